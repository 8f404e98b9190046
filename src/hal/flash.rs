//! Internal flash programming (FPEC)
//!
//! Every call is synchronous: the controller is polled until it leaves the
//! busy state, then the result is read back and compared.

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xCDEF_89AB;

const ERASED_WORD: u32 = 0xFFFF_FFFF;
const PAGE_SIZE_WORDS: u32 = 256;
pub const PAGE_SIZE: u32 = PAGE_SIZE_WORDS * 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    Locked,
    VerifyMismatch { address: u32 },
    NotErased { address: u32 },
    Misaligned,
    /// Block runs past the end of the address space
    OutOfRange,
}

/// Register-level access to the flash program/erase controller
///
/// `program_half_word`, `erase_page` and `erase_all` return once the
/// controller has cleared its busy flag.
pub trait FlashController {
    fn write_key(&mut self, key: u32);
    fn is_locked(&self) -> bool;
    fn lock(&mut self);
    fn program_half_word(&mut self, address: u32, value: u16);
    fn erase_page(&mut self, address: u32);
    fn erase_all(&mut self);
    fn read_half_word(&self, address: u32) -> u16;
    fn read_word(&self, address: u32) -> u32;
}

pub struct Flash<F> {
    controller: F,
}

impl<F: FlashController> Flash<F> {
    pub fn new(controller: F) -> Self {
        Self { controller }
    }

    /// Feed the unlock key sequence
    pub fn unlock(&mut self) -> Result<(), FlashError> {
        self.controller.write_key(KEY1);
        self.controller.write_key(KEY2);
        if self.controller.is_locked() {
            log_error!("flash refused unlock sequence");
            return Err(FlashError::Locked);
        }
        Ok(())
    }

    pub fn lock(&mut self) {
        self.controller.lock();
    }

    pub fn is_locked(&self) -> bool {
        self.controller.is_locked()
    }

    pub fn write_half_word(&mut self, address: u32, value: u16) -> Result<(), FlashError> {
        self.ensure_unlocked()?;
        if address % 2 != 0 {
            return Err(FlashError::Misaligned);
        }
        self.program_verified(address, value)
    }

    /// Program consecutive half-words starting at `address`
    ///
    /// Stops at the first half-word that does not read back. A block that
    /// would run past the top of the address space is refused before
    /// anything is programmed.
    pub fn write_block(&mut self, address: u32, data: &[u16]) -> Result<(), FlashError> {
        self.ensure_unlocked()?;
        if address % 2 != 0 {
            return Err(FlashError::Misaligned);
        }
        if let Some(last) = data.len().checked_sub(1) {
            u32::try_from(last)
                .ok()
                .and_then(|index| index.checked_mul(2))
                .and_then(|offset| address.checked_add(offset))
                .ok_or(FlashError::OutOfRange)?;
        }
        for (index, &value) in data.iter().enumerate() {
            // in range: the last half-word address was checked above
            self.program_verified(address + 2 * index as u32, value)?;
        }
        Ok(())
    }

    /// Erase the page starting at `address` and check it reads blank
    pub fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        self.ensure_unlocked()?;
        if address % PAGE_SIZE != 0 {
            return Err(FlashError::Misaligned);
        }
        self.controller.erase_page(address);
        for word in 0..PAGE_SIZE_WORDS {
            let at = address + word * 4;
            if self.controller.read_word(at) != ERASED_WORD {
                log_error!("flash page not blank at {=u32:#x}", at);
                return Err(FlashError::NotErased { address: at });
            }
        }
        Ok(())
    }

    pub fn mass_erase(&mut self) -> Result<(), FlashError> {
        self.ensure_unlocked()?;
        self.controller.erase_all();
        Ok(())
    }

    pub fn free(self) -> F {
        self.controller
    }

    fn ensure_unlocked(&self) -> Result<(), FlashError> {
        if self.controller.is_locked() {
            Err(FlashError::Locked)
        } else {
            Ok(())
        }
    }

    fn program_verified(&mut self, address: u32, value: u16) -> Result<(), FlashError> {
        self.controller.program_half_word(address, value);
        if self.controller.read_half_word(address) != value {
            log_error!("flash verify failed at {=u32:#x}", address);
            return Err(FlashError::VerifyMismatch { address });
        }
        Ok(())
    }
}
