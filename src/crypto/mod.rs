//! Field-level encryption and stream authentication
//!
//! A master key installed on the database derives a 32-byte key and 16-byte
//! IV per field id (HMAC-SHA256 over a domain label plus the little-endian
//! field id). Column values are transformed in place with AES-256-CTR, which
//! is symmetric and length-preserving, so ciphertext lives in the stored
//! record at the same size as the plaintext. HMAC-SHA256 over opaque byte
//! ranges authenticates exported streams.

use crate::data::{Value, ValueType};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const MAC_SIZE: usize = 32;

/// Per-database encryption context
#[derive(Clone)]
pub struct EncryptionContext {
    master_key: Vec<u8>,
}

impl EncryptionContext {
    pub fn new(master_key: &[u8]) -> Self {
        Self {
            master_key: master_key.to_vec(),
        }
    }

    fn derive(&self, label: &[u8], field_id: u16) -> [u8; MAC_SIZE] {
        let mut mac = HmacSha256::new_from_slice(&self.master_key)
            .expect("HMAC accepts any key length");
        mac.update(label);
        mac.update(&field_id.to_le_bytes());
        mac.finalize().into_bytes().into()
    }

    /// 32-byte field key: HMAC-SHA256(master, "field-key" || id_le)
    pub fn derive_field_key(&self, field_id: u16) -> [u8; KEY_SIZE] {
        self.derive(b"field-key", field_id)
    }

    /// 16-byte field IV: leading bytes of HMAC-SHA256(master, "field-iv" || id_le)
    pub fn derive_field_iv(&self, field_id: u16) -> [u8; IV_SIZE] {
        let full = self.derive(b"field-iv", field_id);
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&full[..IV_SIZE]);
        iv
    }

    /// Apply the field keystream in place. Symmetric: applying twice is the
    /// identity, so this is both encrypt and decrypt.
    pub fn apply_keystream(&self, buf: &mut [u8], field_id: u16) {
        if buf.is_empty() {
            return;
        }
        let key = self.derive_field_key(field_id);
        let iv = self.derive_field_iv(field_id);
        let mut cipher = Aes256Ctr::new(
            GenericArray::from_slice(&key),
            GenericArray::from_slice(&iv),
        );
        cipher.apply_keystream(buf);
    }

    /// Encrypt a value under a field id.
    ///
    /// Scalars keep their variant; string ciphertext is carried as `Bytes`
    /// because ciphertext is not valid UTF-8. Null and Bool pass through.
    pub fn encrypt_value(&self, value: &Value, field_id: u16) -> Value {
        match value {
            Value::Null | Value::Bool(_) => value.clone(),
            Value::Int8(v) => {
                let mut b = v.to_le_bytes();
                self.apply_keystream(&mut b, field_id);
                Value::Int8(i8::from_le_bytes(b))
            }
            Value::Int16(v) => {
                let mut b = v.to_le_bytes();
                self.apply_keystream(&mut b, field_id);
                Value::Int16(i16::from_le_bytes(b))
            }
            Value::Int32(v) => {
                let mut b = v.to_le_bytes();
                self.apply_keystream(&mut b, field_id);
                Value::Int32(i32::from_le_bytes(b))
            }
            Value::Int64(v) => {
                let mut b = v.to_le_bytes();
                self.apply_keystream(&mut b, field_id);
                Value::Int64(i64::from_le_bytes(b))
            }
            Value::UInt8(v) => {
                let mut b = v.to_le_bytes();
                self.apply_keystream(&mut b, field_id);
                Value::UInt8(u8::from_le_bytes(b))
            }
            Value::UInt16(v) => {
                let mut b = v.to_le_bytes();
                self.apply_keystream(&mut b, field_id);
                Value::UInt16(u16::from_le_bytes(b))
            }
            Value::UInt32(v) => {
                let mut b = v.to_le_bytes();
                self.apply_keystream(&mut b, field_id);
                Value::UInt32(u32::from_le_bytes(b))
            }
            Value::UInt64(v) => {
                let mut b = v.to_le_bytes();
                self.apply_keystream(&mut b, field_id);
                Value::UInt64(u64::from_le_bytes(b))
            }
            Value::Float32(v) => {
                let mut b = v.to_le_bytes();
                self.apply_keystream(&mut b, field_id);
                Value::Float32(f32::from_le_bytes(b))
            }
            Value::Float64(v) => {
                let mut b = v.to_le_bytes();
                self.apply_keystream(&mut b, field_id);
                Value::Float64(f64::from_le_bytes(b))
            }
            Value::Str(s) => {
                let mut b = s.clone().into_bytes();
                self.apply_keystream(&mut b, field_id);
                Value::Bytes(b)
            }
            Value::Bytes(bytes) => {
                let mut b = bytes.clone();
                self.apply_keystream(&mut b, field_id);
                Value::Bytes(b)
            }
        }
    }

    /// Decrypt an extracted column value in place, restoring the variant the
    /// column declares (string plaintext comes back as `Str`).
    pub fn decrypt_value(&self, value: &mut Value, declared: ValueType, field_id: u16) {
        let decrypted = match std::mem::replace(value, Value::Null) {
            Value::Str(s) => {
                let mut b = s.into_bytes();
                self.apply_keystream(&mut b, field_id);
                restore_text(b, declared)
            }
            Value::Bytes(mut b) => {
                self.apply_keystream(&mut b, field_id);
                restore_text(b, declared)
            }
            other => self.encrypt_value(&other, field_id),
        };
        *value = decrypted;
    }

    /// HMAC-SHA256 over an opaque byte range under the master key.
    pub fn compute_hmac(&self, buf: &[u8]) -> [u8; MAC_SIZE] {
        let mut mac = HmacSha256::new_from_slice(&self.master_key)
            .expect("HMAC accepts any key length");
        mac.update(buf);
        mac.finalize().into_bytes().into()
    }

    /// Constant-time MAC verification.
    pub fn verify_hmac(&self, buf: &[u8], expected: &[u8]) -> bool {
        let mut mac = HmacSha256::new_from_slice(&self.master_key)
            .expect("HMAC accepts any key length");
        mac.update(buf);
        mac.verify_slice(expected).is_ok()
    }
}

/// Decrypted byte buffers of string columns become `Str` again; everything
/// else stays `Bytes`.
fn restore_text(bytes: Vec<u8>, declared: ValueType) -> Value {
    if declared == ValueType::String {
        match String::from_utf8(bytes) {
            Ok(s) => Value::Str(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        }
    } else {
        Value::Bytes(bytes)
    }
}
