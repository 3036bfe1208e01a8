use bech32::primitives::decode::CheckedHrpstring;
use bech32::{Bech32, Hrp};

use crate::error::{AuditError, AuditResult};

const VALOPER_SUFFIX: &str = "valoper";

/// Bech32 chain addresses: `<hrp>1...` for accounts and `<hrp>valoper1...`
/// for validator operators. Payloads are 20 or 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressCodec {
    hrp: String,
}

impl AddressCodec {
    pub fn new(hrp: impl Into<String>) -> Self {
        Self { hrp: hrp.into() }
    }

    pub fn hrp(&self) -> &str {
        &self.hrp
    }

    fn validator_hrp(&self) -> String {
        format!("{}{VALOPER_SUFFIX}", self.hrp)
    }

    pub fn account_address(&self, payload: &[u8]) -> anyhow::Result<String> {
        encode(&self.hrp, payload)
    }

    pub fn validator_address(&self, payload: &[u8]) -> anyhow::Result<String> {
        encode(&self.validator_hrp(), payload)
    }

    pub fn parse_account(&self, address: &str) -> anyhow::Result<Vec<u8>> {
        decode(address, &self.hrp)
    }

    pub fn parse_validator(&self, address: &str) -> anyhow::Result<Vec<u8>> {
        decode(address, &self.validator_hrp())
    }

    pub fn validate_account(&self, address: &str) -> bool {
        self.parse_account(address).is_ok()
    }

    pub(crate) fn require_reporter(&self, address: &str) -> AuditResult<()> {
        self.parse_account(address)
            .map(|_| ())
            .map_err(|e| AuditError::InvalidReporter(format!("{address}: {e}")))
    }

    pub(crate) fn require_subject(&self, address: &str) -> AuditResult<()> {
        self.parse_account(address)
            .map(|_| ())
            .map_err(|e| AuditError::InvalidSubject(format!("{address}: {e}")))
    }
}

fn check_payload_len(len: usize) -> anyhow::Result<()> {
    match len {
        20 | 32 => Ok(()),
        n => anyhow::bail!("invalid address length {n}"),
    }
}

fn encode(hrp: &str, payload: &[u8]) -> anyhow::Result<String> {
    check_payload_len(payload.len())?;
    let hrp = Hrp::parse(hrp)?;
    Ok(bech32::encode::<Bech32>(hrp, payload)?)
}

fn decode(address: &str, want_hrp: &str) -> anyhow::Result<Vec<u8>> {
    // Addresses are store keys, so only the canonical lowercase form is accepted.
    if address.chars().any(|c| c.is_ascii_uppercase()) {
        anyhow::bail!("address must be lowercase");
    }
    let checked = CheckedHrpstring::new::<Bech32>(address)?;
    let hrp = checked.hrp().to_lowercase();
    if hrp != want_hrp {
        anyhow::bail!("expected prefix {want_hrp}, got {hrp}");
    }
    let payload: Vec<u8> = checked.byte_iter().collect();
    check_payload_len(payload.len())?;
    Ok(payload)
}
