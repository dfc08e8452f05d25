// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Canonical binary encoding used for hashing, signing, storage and the wire.

use bincode::config::{Configuration, Limit, LittleEndian, Varint};

pub const CODEC_BYTES_LIMIT: usize = 4_194_304;

type CodecConfig = Configuration<LittleEndian, Varint, Limit<CODEC_BYTES_LIMIT>>;

#[inline]
fn config() -> CodecConfig {
    bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .with_limit::<CODEC_BYTES_LIMIT>()
}

pub fn encode_to_vec<T: bincode::Encode>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::encode_to_vec(val, config())
}

/// Decodes a value, rejecting any trailing bytes.
pub fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, bincode::error::DecodeError> {
    let (val, read) = bincode::decode_from_slice(bytes, config())?;

    if read != bytes.len() {
        return Err(bincode::error::DecodeError::Other("trailing bytes"));
    }

    Ok(val)
}

/// Size in bytes of the canonical encoding of `val`.
pub fn encoded_len<T: bincode::Encode>(val: &T) -> usize {
    let mut writer = bincode::enc::write::SizeWriter::default();
    match bincode::encode_into_writer(val, &mut writer, config()) {
        Ok(()) => writer.bytes_written,
        Err(_) => usize::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::{Decode, Encode};

    #[derive(Encode, Decode, Debug, PartialEq)]
    enum TestEnum {
        A(u32),
        B(u32),
    }

    #[test]
    fn test_single_byte_enum_variant() {
        let encoded = encode_to_vec(&TestEnum::B(0)).unwrap();
        assert_eq!(encoded.as_slice(), &[1, 0]);
    }

    #[test]
    fn test_single_byte_u8() {
        let byte: u8 = 0xff;
        let encoded = encode_to_vec(&byte).unwrap();
        assert_eq!(encoded.as_slice(), &[0xff]);
    }

    #[test]
    fn test_single_byte_vec_u8() {
        let input: Vec<u8> = vec![0xff, 0xff];
        let encoded = encode_to_vec(&input).unwrap();
        assert_eq!(encoded.as_slice(), &[0x02, 0xff, 0xff]);
    }

    #[test]
    fn fixed_arrays_have_no_length_prefix() {
        let encoded = encode_to_vec(&[7u8; 4]).unwrap();
        assert_eq!(encoded.as_slice(), &[7, 7, 7, 7]);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut encoded = encode_to_vec(&TestEnum::A(3)).unwrap();
        encoded.push(0);
        assert!(decode::<TestEnum>(&encoded).is_err());
        encoded.pop();
        assert_eq!(decode::<TestEnum>(&encoded).unwrap(), TestEnum::A(3));
    }

    #[test]
    fn encoded_len_matches_vec() {
        let input: Vec<u64> = vec![1, 300, 70_000, u64::MAX];
        assert_eq!(encoded_len(&input), encode_to_vec(&input).unwrap().len());
    }
}
