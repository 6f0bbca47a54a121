//! Interrupt-safe shared cells.
//!
//! Every access to state owned by an interrupt handler goes through
//! [`Shared`], which runs the closure inside a critical section. Readers on
//! the main loop take a [`Shared::snapshot`] and do their arithmetic on the
//! copy after interrupts are re-enabled.

use core::cell::RefCell;

use critical_section::Mutex;

/// A value shared between interrupt handlers and the main loop.
pub struct Shared<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> Shared<T> {
    /// Wraps `value` for cross-context access.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Runs `f` with exclusive access to the value inside a critical section.
    ///
    /// Nested calls on the same cell panic; keep the closure short and never
    /// call back into code that may lock this cell again.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    /// Replaces the stored value.
    pub fn replace(&self, value: T) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).replace(value))
    }
}

impl<T: Clone> Shared<T> {
    /// Copies the value out under a critical section.
    pub fn snapshot(&self) -> T {
        critical_section::with(|cs| self.inner.borrow_ref(cs).clone())
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_last_lock() {
        let cell = Shared::new(10_u32);
        cell.lock(|value| *value += 5);
        assert_eq!(cell.snapshot(), 15);
    }

    #[test]
    fn replace_returns_previous_value() {
        let cell = Shared::new(1_u8);
        assert_eq!(cell.replace(2), 1);
        assert_eq!(cell.snapshot(), 2);
    }
}
