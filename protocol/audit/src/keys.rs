//! Key layout of the audit store.
//!
//! Every epoch/window/evidence id is encoded as a fixed-width big-endian `u64`,
//! so lexicographic key order equals numeric id order. Builders and decoders
//! live side by side so a format change breaks the round-trip tests here first.

pub const PARAMS_KEY: &[u8] = b"p_audit";
pub const NEXT_EVIDENCE_ID_KEY: &[u8] = b"nei";
pub const WINDOW_STATE_KEY: &[u8] = b"ws";
pub const NEXT_WINDOW_BLOCKS_KEY: &[u8] = b"nwb";

pub const EVIDENCE_PREFIX: &[u8] = b"ev/";
pub const EVIDENCE_BY_SUBJECT_PREFIX: &[u8] = b"evs/";
pub const EVIDENCE_BY_ACTION_PREFIX: &[u8] = b"eva/";
pub const EVIDENCE_EPOCH_COUNT_PREFIX: &[u8] = b"eve/";
pub const EVIDENCE_WINDOW_COUNT_PREFIX: &[u8] = b"evw/";
pub const EPOCH_ANCHOR_PREFIX: &[u8] = b"ea/";
pub const EPOCH_PARAMS_SNAPSHOT_PREFIX: &[u8] = b"eps/";
pub const REPORT_PREFIX: &[u8] = b"r/";
pub const REPORT_INDEX_PREFIX: &[u8] = b"ri/";
pub const SELF_REPORT_INDEX_PREFIX: &[u8] = b"ss/";
pub const SUPERNODE_REPORT_INDEX_PREFIX: &[u8] = b"sr/";
pub const POSTPONED_FOR_EVIDENCE_PREFIX: &[u8] = b"pfe/";
pub const AUDIT_STATUS_PREFIX: &[u8] = b"as/";

const SEP: u8 = b'/';
const ID_LEN: usize = 8;

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

pub fn encode_id(id: u64) -> [u8; ID_LEN] {
    id.to_be_bytes()
}

pub fn decode_id(bytes: &[u8]) -> Option<u64> {
    let raw: [u8; ID_LEN] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}

fn read_leading_id(rest: &[u8]) -> Option<(u64, &[u8])> {
    if rest.len() < ID_LEN {
        return None;
    }
    let (id, tail) = rest.split_at(ID_LEN);
    Some((decode_id(id)?, tail))
}

fn read_trailing_id(rest: &[u8]) -> Option<(&[u8], u64)> {
    if rest.len() < ID_LEN + 1 {
        return None;
    }
    let (head, id) = rest.split_at(rest.len() - ID_LEN);
    let head = head.strip_suffix(&[SEP])?;
    Some((head, decode_id(id)?))
}

fn utf8(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}

// ---- evidence ----

pub fn evidence_key(id: u64) -> Vec<u8> {
    concat(&[EVIDENCE_PREFIX, &encode_id(id)])
}

pub fn decode_evidence_key(key: &[u8]) -> Option<u64> {
    decode_id(key.strip_prefix(EVIDENCE_PREFIX)?)
}

pub fn evidence_by_subject_prefix(subject: &str) -> Vec<u8> {
    concat(&[EVIDENCE_BY_SUBJECT_PREFIX, subject.as_bytes(), &[SEP]])
}

pub fn evidence_by_subject_key(subject: &str, id: u64) -> Vec<u8> {
    concat(&[&evidence_by_subject_prefix(subject), &encode_id(id)])
}

pub fn evidence_by_action_prefix(action_id: &str) -> Vec<u8> {
    concat(&[EVIDENCE_BY_ACTION_PREFIX, action_id.as_bytes(), &[SEP]])
}

pub fn evidence_by_action_key(action_id: &str, id: u64) -> Vec<u8> {
    concat(&[&evidence_by_action_prefix(action_id), &encode_id(id)])
}

pub fn decode_evidence_index_key(key: &[u8]) -> Option<(String, u64)> {
    let rest = key
        .strip_prefix(EVIDENCE_BY_SUBJECT_PREFIX)
        .or_else(|| key.strip_prefix(EVIDENCE_BY_ACTION_PREFIX))?;
    let (head, id) = read_trailing_id(rest)?;
    Some((utf8(head)?, id))
}

pub fn evidence_epoch_count_key(epoch_id: u64, subject: &str, evidence_type: u8) -> Vec<u8> {
    concat(&[
        EVIDENCE_EPOCH_COUNT_PREFIX,
        &encode_id(epoch_id),
        subject.as_bytes(),
        &[SEP, evidence_type],
    ])
}

pub fn evidence_window_count_key(window_id: u64, subject: &str, evidence_type: u8) -> Vec<u8> {
    concat(&[
        EVIDENCE_WINDOW_COUNT_PREFIX,
        &encode_id(window_id),
        subject.as_bytes(),
        &[SEP, evidence_type],
    ])
}

pub fn decode_evidence_count_key(key: &[u8]) -> Option<(u64, String, u8)> {
    let rest = key
        .strip_prefix(EVIDENCE_EPOCH_COUNT_PREFIX)
        .or_else(|| key.strip_prefix(EVIDENCE_WINDOW_COUNT_PREFIX))?;
    let (id, tail) = read_leading_id(rest)?;
    let (&evidence_type, head) = tail.split_last()?;
    let subject = head.strip_suffix(&[SEP])?;
    Some((id, utf8(subject)?, evidence_type))
}

// ---- anchors and snapshots ----

pub fn epoch_anchor_key(epoch_id: u64) -> Vec<u8> {
    concat(&[EPOCH_ANCHOR_PREFIX, &encode_id(epoch_id)])
}

pub fn epoch_params_snapshot_key(epoch_id: u64) -> Vec<u8> {
    concat(&[EPOCH_PARAMS_SNAPSHOT_PREFIX, &encode_id(epoch_id)])
}

// ---- reports and indices ----

pub fn report_epoch_prefix(epoch_id: u64) -> Vec<u8> {
    concat(&[REPORT_PREFIX, &encode_id(epoch_id)])
}

pub fn report_key(epoch_id: u64, reporter: &str) -> Vec<u8> {
    concat(&[&report_epoch_prefix(epoch_id), reporter.as_bytes()])
}

pub fn decode_report_key(key: &[u8]) -> Option<(u64, String)> {
    let (epoch_id, reporter) = read_leading_id(key.strip_prefix(REPORT_PREFIX)?)?;
    Some((epoch_id, utf8(reporter)?))
}

pub fn report_index_prefix(reporter: &str) -> Vec<u8> {
    concat(&[REPORT_INDEX_PREFIX, reporter.as_bytes(), &[SEP]])
}

pub fn report_index_key(reporter: &str, epoch_id: u64) -> Vec<u8> {
    concat(&[&report_index_prefix(reporter), &encode_id(epoch_id)])
}

pub fn self_report_index_prefix(reporter: &str) -> Vec<u8> {
    concat(&[SELF_REPORT_INDEX_PREFIX, reporter.as_bytes(), &[SEP]])
}

pub fn self_report_index_key(reporter: &str, epoch_id: u64) -> Vec<u8> {
    concat(&[&self_report_index_prefix(reporter), &encode_id(epoch_id)])
}

/// Decodes `ri/` and `ss/` keys, whose epoch id trails the reporter.
pub fn decode_reporter_index_key(key: &[u8]) -> Option<(String, u64)> {
    let rest = key
        .strip_prefix(REPORT_INDEX_PREFIX)
        .or_else(|| key.strip_prefix(SELF_REPORT_INDEX_PREFIX))?;
    let (head, id) = read_trailing_id(rest)?;
    Some((utf8(head)?, id))
}

pub fn supernode_report_index_prefix(target: &str) -> Vec<u8> {
    concat(&[SUPERNODE_REPORT_INDEX_PREFIX, target.as_bytes(), &[SEP]])
}

pub fn supernode_report_index_epoch_prefix(target: &str, epoch_id: u64) -> Vec<u8> {
    concat(&[
        &supernode_report_index_prefix(target),
        &encode_id(epoch_id),
        &[SEP],
    ])
}

pub fn supernode_report_index_key(target: &str, epoch_id: u64, reporter: &str) -> Vec<u8> {
    concat(&[
        &supernode_report_index_epoch_prefix(target, epoch_id),
        reporter.as_bytes(),
    ])
}

/// Splits `sr/<target>/<epoch_id>/<reporter>`.
///
/// Accounts never contain `/`, so the target ends at the first separator; the
/// epoch id is fixed width and may itself contain the separator byte.
pub fn decode_supernode_report_index_key(key: &[u8]) -> Option<(String, u64, String)> {
    let rest = key.strip_prefix(SUPERNODE_REPORT_INDEX_PREFIX)?;
    let sep = rest.iter().position(|b| *b == SEP)?;
    let (target, rest) = rest.split_at(sep);
    let (epoch_id, rest) = read_leading_id(&rest[1..])?;
    let reporter = rest.strip_prefix(&[SEP])?;
    Some((utf8(target)?, epoch_id, utf8(reporter)?))
}

// ---- enforcement state ----

/// `pfe/<account>` → big-endian epoch id the evidence postponement started at.
pub fn postponed_for_evidence_key(account: &str) -> Vec<u8> {
    concat(&[POSTPONED_FOR_EVIDENCE_PREFIX, account.as_bytes()])
}

pub fn audit_status_key(validator_address: &str) -> Vec<u8> {
    concat(&[AUDIT_STATUS_PREFIX, validator_address.as_bytes()])
}
