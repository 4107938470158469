// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::Message;
use crate::shim::{address::Address, crypto::Signature};
use crate::utils::cid::CidCborExt;
use cid::Cid;
use fvm_ipld_encoding::tuple::*;

/// Represents a wrapped message with signature bytes.
#[derive(PartialEq, Clone, Debug, Serialize_tuple, Deserialize_tuple, Eq)]
pub struct SignedMessage {
    pub message: Message,
    pub signature: Signature,
}

impl SignedMessage {
    /// Generate a new signed message from fields.
    /// The signature will be verified.
    pub fn new_from_parts(message: Message, signature: Signature) -> anyhow::Result<SignedMessage> {
        let signed = SignedMessage { message, signature };
        signed.verify()?;
        Ok(signed)
    }

    /// Generate a new signed message from fields.
    /// The signature will not be verified.
    pub fn new_unchecked(message: Message, signature: Signature) -> SignedMessage {
        SignedMessage { message, signature }
    }

    /// Returns reference to the unsigned message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Returns signature of the signed message.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Consumes self and returns it's unsigned message.
    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn from(&self) -> Address {
        self.message.from
    }

    pub fn sequence(&self) -> u64 {
        self.message.sequence
    }

    /// Verifies that the from address of the message generated the signature.
    pub fn verify(&self) -> anyhow::Result<()> {
        let cid = self.message.cid()?;
        self.signature
            .verify(&cid.to_bytes(), &self.message.from)
            .map_err(anyhow::Error::msg)
    }

    /// Content identifier of the signed message, the identity used for deduplication and
    /// receipt lookup.
    pub fn cid(&self) -> anyhow::Result<Cid> {
        Cid::from_cbor_blake2b256(self)
    }
}
