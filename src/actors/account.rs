// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{BuiltinActor, missing_export};
use crate::interpreter::{ActorError, Runtime};
use crate::message::MethodNum;
use fvm_ipld_encoding::RawBytes;

/// Account Actor. Accounts only hold a balance and a nonce; the pure transfer
/// is handled by the VM before dispatch.
pub struct Actor;

impl Actor {
    pub fn invoke_method<RT: Runtime>(
        _rt: &mut RT,
        method: MethodNum,
        _params: &RawBytes,
    ) -> Result<RawBytes, ActorError> {
        Err(missing_export(BuiltinActor::Account, method))
    }
}
