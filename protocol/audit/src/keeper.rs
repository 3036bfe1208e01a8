use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use state::KvStore;

use crate::address::AddressCodec;
use crate::error::{AuditError, AuditResult};
use crate::keys;
use crate::params::Params;
use crate::registry::SupernodeRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u64,
    /// May be empty in harnesses without a real header.
    pub header_hash: Vec<u8>,
}

impl BlockContext {
    pub fn new(height: u64, header_hash: impl Into<Vec<u8>>) -> Self {
        Self {
            height,
            header_hash: header_hash.into(),
        }
    }
}

pub struct Keeper<S: KvStore> {
    store: S,
    codec: AddressCodec,
    registry: Arc<dyn SupernodeRegistry>,
    authority: String,
}

impl<S: KvStore> Keeper<S> {
    pub fn new(
        store: S,
        codec: AddressCodec,
        registry: Arc<dyn SupernodeRegistry>,
        authority: impl Into<String>,
    ) -> Self {
        Self {
            store,
            codec,
            registry,
            authority: authority.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn codec(&self) -> &AddressCodec {
        &self.codec
    }

    pub fn registry(&self) -> &dyn SupernodeRegistry {
        self.registry.as_ref()
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Live params with defaults applied. An unset store yields the defaults.
    pub fn get_params(&self) -> AuditResult<Params> {
        Ok(self
            .read::<Params>(keys::PARAMS_KEY)?
            .unwrap_or_default()
            .with_defaults())
    }

    pub fn set_params(&self, params: &Params) -> AuditResult<()> {
        params.validate()?;
        self.write(keys::PARAMS_KEY, &params.clone().with_defaults())
    }

    pub(crate) fn read<T: DeserializeOwned>(&self, key: &[u8]) -> AuditResult<Option<T>> {
        match self.store.get(key) {
            Some(bz) => Ok(Some(bincode::deserialize(&bz)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn write<T: Serialize>(&self, key: &[u8], value: &T) -> AuditResult<()> {
        let bz = bincode::serialize(value)?;
        self.store.set(key, &bz);
        Ok(())
    }

    pub(crate) fn read_u64(&self, key: &[u8]) -> AuditResult<Option<u64>> {
        match self.store.get(key) {
            None => Ok(None),
            Some(bz) => keys::decode_id(&bz).map(Some).ok_or_else(|| {
                AuditError::CorruptState(format!(
                    "value under {} has length {}",
                    String::from_utf8_lossy(key),
                    bz.len()
                ))
            }),
        }
    }

    pub(crate) fn write_u64(&self, key: &[u8], value: u64) {
        self.store.set(key, &keys::encode_id(value));
    }
}
