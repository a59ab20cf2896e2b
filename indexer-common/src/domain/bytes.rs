// This file is part of utxo-indexer.
// Copyright (C) 2025 The utxo-indexer authors
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use derive_more::{AsRef, From, Into};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt::{self, Debug, Display};
use thiserror::Error;

/// Variable-length byte value: block and transaction hashes, datums, raw
/// metadata. Serialized as a hex string, stored as a BLOB.
///
/// `Display` renders the full hex encoding; `Debug` abbreviates after four
/// bytes so structured log records stay short.
#[derive(Default, Clone, PartialEq, Eq, Hash, AsRef, From, Into, Serialize, Deserialize, Type)]
#[as_ref([u8])]
#[from(Vec<u8>, &[u8])]
#[sqlx(transparent)]
pub struct ByteVec(#[serde(with = "const_hex")] pub Vec<u8>);

impl ByteVec {
    /// True for a zero-length value, e.g. the hash of the origin point.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Debug for ByteVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(self.as_ref(), f, true)
    }
}

impl Display for ByteVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(self.as_ref(), f, false)
    }
}

/// Fixed-length byte value, e.g. the 28-byte policy id of a native token.
/// Rendered like [ByteVec].
#[derive(Clone, Copy, PartialEq, Eq, Hash, AsRef, From, Into, Serialize, Deserialize)]
#[as_ref([u8])]
pub struct ByteArray<const N: usize>(#[serde(with = "const_hex")] pub [u8; N]);

impl<const N: usize> Default for ByteArray<N> {
    /// All zeroes.
    fn default() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> TryFrom<&[u8]> for ByteArray<N> {
    type Error = ByteArrayLenError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        bytes.try_into().map(Self).map_err(|_| ByteArrayLenError {
            expected: N,
            actual: bytes.len(),
        })
    }
}

impl<const N: usize> TryFrom<Vec<u8>> for ByteArray<N> {
    type Error = ByteArrayLenError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        bytes.as_slice().try_into()
    }
}

impl<const N: usize> Debug for ByteArray<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(self.as_ref(), f, true)
    }
}

impl<const N: usize> Display for ByteArray<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(self.as_ref(), f, false)
    }
}

#[derive(Debug, Error)]
#[error("expected {expected} bytes, got {actual}")]
pub struct ByteArrayLenError {
    pub expected: usize,
    pub actual: usize,
}

fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter<'_>, abbreviate: bool) -> fmt::Result {
    let hex = const_hex::encode(bytes);

    if abbreviate && hex.len() > 8 {
        write!(f, "{}…", &hex[0..8])
    } else {
        write!(f, "{hex}")
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{ByteArray, ByteVec};

    #[test]
    fn test_byte_vec() {
        let bytes = ByteVec::default();
        assert!(bytes.is_empty());
        assert_eq!(format!("{bytes:?}"), "");
        assert_eq!(format!("{bytes}"), "");

        let bytes = ByteVec::from([0, 1, 2, 3].as_slice());
        assert_eq!(bytes.len(), 4);
        assert_eq!(format!("{bytes:?}"), "00010203");
        assert_eq!(format!("{bytes}"), "00010203");

        let bytes = ByteVec::from(vec![0, 1, 2, 3, 4]);
        assert_eq!(format!("{bytes:?}"), "00010203…");
        assert_eq!(format!("{bytes}"), "0001020304");
    }

    #[test]
    fn test_byte_vec_serde() {
        let bytes = ByteVec::from(vec![0xca, 0xfe]);
        let json = serde_json::to_string(&bytes).expect("ByteVec can be serialized");
        assert_eq!(json, r#""cafe""#);
        let bytes_2 = serde_json::from_str::<ByteVec>(&json).expect("ByteVec can be deserialized");
        assert_eq!(bytes_2, bytes);
    }

    #[test]
    fn test_byte_array() {
        let bytes = ByteArray::from([0, 1, 2, 3]);
        assert_eq!(format!("{bytes:?}"), "00010203");
        assert_eq!(format!("{bytes}"), "00010203");

        let bytes = ByteArray::from([0, 1, 2, 3, 4]);
        assert_eq!(format!("{bytes:?}"), "00010203…");
        assert_eq!(format!("{bytes}"), "0001020304");
    }

    #[test]
    fn test_byte_array_len() {
        assert!(ByteArray::<4>::try_from([0, 1, 2, 3].as_slice()).is_ok());

        let error = ByteArray::<4>::try_from([0, 1, 2].as_slice()).unwrap_err();
        assert_eq!(error.to_string(), "expected 4 bytes, got 3");
    }
}
