//! Holders for biometric and credential data.
//!
//! Match confidences, finger IDs, device passwords and raw templates should
//! not linger in freed memory. [`Sensitive`] wraps a single value and
//! [`SecureBuffer`] a growable byte buffer; both overwrite their storage with
//! zeros when dropped. Ownership guarantees the drop runs exactly once.
//!
//! # Examples
//!
//! ```
//! use carbio_core::{SecureBuffer, Sensitive};
//!
//! let confidence = Sensitive::new(182u16);
//! assert_eq!(*confidence.get(), 182);
//! assert_eq!(format!("{confidence:?}"), "Sensitive(<redacted>)");
//!
//! let mut template = SecureBuffer::with_capacity(512);
//! template.extend_from_slice(&[0xAB; 128]);
//! assert_eq!(template.len(), 128);
//! ```

use std::fmt;
use std::ops::Deref;
use zeroize::Zeroize;

/// A value that is zeroed when it goes out of scope.
///
/// `Debug` never prints the value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Sensitive<T: Zeroize>(T);

impl<T: Zeroize> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the wrapped value.
    #[inline]
    pub fn get(&self) -> &T {
        &self.0
    }

    /// Replace the wrapped value, wiping the previous one first.
    pub fn set(&mut self, value: T) {
        self.0.zeroize();
        self.0 = value;
    }
}

impl<T: Zeroize + Copy> Sensitive<T> {
    /// Copy the value out. The copy is not protected.
    #[inline]
    pub fn value(&self) -> T {
        self.0
    }
}

impl<T: Zeroize> From<T> for Sensitive<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T: Zeroize> Drop for Sensitive<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sensitive(<redacted>)")
    }
}

/// Byte buffer for templates and images, zeroed (including spare capacity)
/// on drop.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecureBuffer {
    bytes: Vec<u8>,
}

impl SecureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Take ownership of `bytes`; they are wiped when the buffer drops.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        // Growing would reallocate and leave the old copy behind.
        if self.bytes.len() + data.len() > self.bytes.capacity() {
            let mut grown = Vec::with_capacity((self.bytes.len() + data.len()).next_power_of_two());
            grown.extend_from_slice(&self.bytes);
            self.bytes.zeroize();
            self.bytes = grown;
        }
        self.bytes.extend_from_slice(data);
    }

    /// Truncate to `len` bytes, wiping the removed tail.
    pub fn truncate(&mut self, len: usize) {
        if len < self.bytes.len() {
            self.bytes[len..].zeroize();
            self.bytes.truncate(len);
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Deref for SecureBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for SecureBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&[u8]> for SecureBuffer {
    fn from(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureBuffer")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}
