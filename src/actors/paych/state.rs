// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{ChannelId, ChannelInfo, PaymentChannel};
use crate::shim::address::Address;
use crate::state_tree::HAMT_BIT_WIDTH;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_hamt::{BytesKey, Hamt};

type Map<BS, V> = Hamt<BS, V>;

fn payer_key(payer: &Address) -> BytesKey {
    payer.to_bytes().into()
}

/// HAMT iteration order is not key order, see [`State::channels_of`].
fn channel_key(chid: ChannelId) -> BytesKey {
    chid.to_be_bytes().to_vec().into()
}

/// Payment broker state: payer → (channel id → channel), both levels HAMTs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct State {
    pub channels: Cid,
}

impl State {
    pub fn new<BS: Blockstore>(store: &BS) -> anyhow::Result<Self> {
        let channels = empty_root::<_, Cid>(store)?;
        Ok(Self { channels })
    }

    pub fn get_channel<BS: Blockstore>(
        &self,
        store: &BS,
        payer: &Address,
        chid: ChannelId,
    ) -> anyhow::Result<Option<PaymentChannel>> {
        let Some(inner) = self.payer_root(store, payer)? else {
            return Ok(None);
        };
        let channels: Map<_, PaymentChannel> =
            Hamt::load_with_bit_width(&inner, store, HAMT_BIT_WIDTH)?;
        Ok(channels.get(&channel_key(chid))?.cloned())
    }

    pub fn put_channel<BS: Blockstore>(
        &mut self,
        store: &BS,
        payer: &Address,
        chid: ChannelId,
        channel: PaymentChannel,
    ) -> anyhow::Result<()> {
        let mut channels: Map<_, PaymentChannel> = match self.payer_root(store, payer)? {
            Some(inner) => Hamt::load_with_bit_width(&inner, store, HAMT_BIT_WIDTH)?,
            None => Hamt::new_with_bit_width(store, HAMT_BIT_WIDTH),
        };
        channels.set(channel_key(chid), channel)?;
        let inner = channels.flush()?;
        self.set_payer_root(store, payer, Some(inner))
    }

    /// Removes a channel and prunes the payer once it has no channels left.
    pub fn delete_channel<BS: Blockstore>(
        &mut self,
        store: &BS,
        payer: &Address,
        chid: ChannelId,
    ) -> anyhow::Result<()> {
        let Some(inner) = self.payer_root(store, payer)? else {
            return Ok(());
        };
        let mut channels: Map<_, PaymentChannel> =
            Hamt::load_with_bit_width(&inner, store, HAMT_BIT_WIDTH)?;
        channels.delete(&channel_key(chid))?;
        let inner = channels.flush()?;
        if inner == empty_root::<_, PaymentChannel>(store)? {
            self.set_payer_root(store, payer, None)
        } else {
            self.set_payer_root(store, payer, Some(inner))
        }
    }

    /// Every channel of `payer`, ordered by id.
    pub fn channels_of<BS: Blockstore>(
        &self,
        store: &BS,
        payer: &Address,
    ) -> anyhow::Result<Vec<ChannelInfo>> {
        let Some(inner) = self.payer_root(store, payer)? else {
            return Ok(vec![]);
        };
        let channels: Map<_, PaymentChannel> =
            Hamt::load_with_bit_width(&inner, store, HAMT_BIT_WIDTH)?;
        let mut out = vec![];
        channels.for_each(|k, channel| {
            let id = ChannelId::from_be_bytes(k.0.as_slice().try_into()?);
            out.push(ChannelInfo {
                id,
                channel: channel.clone(),
            });
            Ok(())
        })?;
        out.sort_by_key(|info| info.id);
        Ok(out)
    }

    /// Whether `payer` has any open channel.
    pub fn has_payer<BS: Blockstore>(&self, store: &BS, payer: &Address) -> anyhow::Result<bool> {
        Ok(self.payer_root(store, payer)?.is_some())
    }

    fn payer_root<BS: Blockstore>(&self, store: &BS, payer: &Address) -> anyhow::Result<Option<Cid>> {
        let payers: Map<_, Cid> = Hamt::load_with_bit_width(&self.channels, store, HAMT_BIT_WIDTH)?;
        Ok(payers.get(&payer_key(payer))?.copied())
    }

    fn set_payer_root<BS: Blockstore>(
        &mut self,
        store: &BS,
        payer: &Address,
        root: Option<Cid>,
    ) -> anyhow::Result<()> {
        let mut payers: Map<_, Cid> =
            Hamt::load_with_bit_width(&self.channels, store, HAMT_BIT_WIDTH)?;
        match root {
            Some(root) => {
                payers.set(payer_key(payer), root)?;
            }
            None => {
                payers.delete(&payer_key(payer))?;
            }
        }
        self.channels = payers.flush()?;
        Ok(())
    }
}

fn empty_root<BS, V>(store: &BS) -> anyhow::Result<Cid>
where
    BS: Blockstore,
    V: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut map: Map<_, V> = Hamt::new_with_bit_width(store, HAMT_BIT_WIDTH);
    Ok(map.flush()?)
}
