// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bech32::{self, FromBase32, ToBase32, Variant};
use bincode::error::DecodeError;
use bincode::{Decode, Encode};
use ed25519_dalek::{Signature as EdSignature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::Hash as HashTrait;

#[cfg(test)]
use rand::Rng;

pub const ADDRESS_BYTES: usize = 20;

/// Human readable part of bech32 addresses
pub const ADDRESS_HRP: &str = "lnc";

const HASH_KEY_PREFIX: &str = "lunacoin.hash.";

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, HashTrait, Encode, Decode)]
pub struct Address(pub [u8; ADDRESS_BYTES]);

impl Address {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; ADDRESS_BYTES])
    }

    #[must_use]
    pub fn to_bech32(&self) -> String {
        bech32::encode(ADDRESS_HRP, self.0.to_base32(), Variant::Bech32m)
            .unwrap_or_else(|_| hex::encode(self.0))
    }

    pub fn from_bech32(encoded: &str) -> Result<Self, &'static str> {
        let (hrp, data, _variant) = bech32::decode(encoded).map_err(|_| "invalid address")?;

        if hrp != ADDRESS_HRP {
            return Err("invalid address prefix");
        }

        let data: Vec<u8> = Vec::<u8>::from_base32(&data).map_err(|_| "invalid address")?;

        if data.len() != ADDRESS_BYTES {
            return Err("invalid address length");
        }

        let mut out = Self([0; ADDRESS_BYTES]);
        out.0.copy_from_slice(&data);
        Ok(out)
    }

    /// Validate against public key
    #[must_use]
    pub fn validate(&self, public_key: &PublicKey) -> bool {
        self == &public_key.to_address()
    }

    #[cfg(test)]
    #[must_use]
    pub fn random() -> Self {
        Self(rand::thread_rng().gen())
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        String::serialize(&self.to_bech32(), serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        Address::from_bech32(&string).map_err(|err| serde::de::Error::custom(err.to_owned()))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.to_bech32()).finish()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bech32())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, HashTrait)]
pub struct PublicKey(pub VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| "invalid slice length! expected 32")?;

        Ok(Self(
            VerifyingKey::from_bytes(&bytes).map_err(|_| "could not decode public key")?,
        ))
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;
        Self::from_bytes(&bytes)
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.0.to_bytes()
    }

    /// Address of the key. Two rounds of keyed blake3 truncated to 20 bytes.
    #[inline]
    #[must_use]
    pub fn to_address(&self) -> Address {
        let mut address = Address([0; ADDRESS_BYTES]);
        let hash1 = Hash256::hash_from_slice(self.0.as_bytes(), "address");
        let mut hasher = blake3::Hasher::new_derive_key("lunacoin.hash.20.address");
        hasher.update(&hash1.0);
        let mut out = hasher.finalize_xof();
        out.fill(&mut address.0);
        address
    }

    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.0.verify_strict(message, &signature.0).is_ok()
    }
}

impl Encode for PublicKey {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.0.to_bytes(), encoder)?;
        Ok(())
    }
}

impl<Context> Decode<Context> for PublicKey {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> core::result::Result<Self, DecodeError> {
        let pk_bytes: [u8; PUBLIC_KEY_LENGTH] = bincode::Decode::decode(decoder)?;
        let result = VerifyingKey::from_bytes(&pk_bytes)
            .map_err(|_| DecodeError::Other("invalid public key format"))?;
        Ok(Self(result))
    }
}

bincode::impl_borrow_decode!(PublicKey);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub EdSignature);

impl Signature {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        self.0.to_bytes()
    }
}

impl Encode for Signature {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.0.to_bytes(), encoder)?;
        Ok(())
    }
}

impl<Context> Decode<Context> for Signature {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> core::result::Result<Self, DecodeError> {
        let sig_bytes: [u8; SIGNATURE_LENGTH] = bincode::Decode::decode(decoder)?;
        Ok(Self(EdSignature::from_bytes(&sig_bytes)))
    }
}

bincode::impl_borrow_decode!(Signature);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature")
            .field(&hex::encode(self.0.to_bytes()))
            .finish()
    }
}

#[derive(
    PartialEq, Eq, PartialOrd, Ord, Encode, Decode, Clone, Copy, HashTrait, Serialize, Deserialize,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; 32])
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;

        if bytes.len() != 32 {
            return Err("invalid hash length");
        }

        let mut out = Self::zero();
        out.0.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Domain separated blake3 hash. `key` names the domain.
    #[must_use]
    pub fn hash_from_slice<T: AsRef<[u8]>>(slice: T, key: &str) -> Self {
        let mut out_hash = Hash256([0; 32]);
        let key = format!("{HASH_KEY_PREFIX}32.{key}");
        let mut hasher = blake3::Hasher::new_derive_key(&key);
        hasher.update(slice.as_ref());
        let mut out = hasher.finalize_xof();
        out.fill(&mut out_hash.0);
        out_hash
    }

    #[must_use]
    pub fn meets_difficulty(&self, bits: u32) -> bool {
        crate::consensus::hash_meets_bits(self, bits)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(v: [u8; 32]) -> Self {
        Self(v)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash256").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
