use audit::{AuditMsg, EvidenceType, MsgSubmitEvidence, MsgUpdateParams, Params};
use proptest::prelude::*;
use runtime::{apply_block, from_genesis, Block, BlockHeader, GenesisConfig, Tx, TxPayload};

fn short_string() -> impl Strategy<Value = String> {
    proptest::string::string_regex(".{0,16}").unwrap()
}

fn arb_evidence_type() -> impl Strategy<Value = EvidenceType> {
    prop::sample::select(EvidenceType::ALL.to_vec())
}

fn arb_payload() -> impl Strategy<Value = TxPayload> {
    prop_oneof![
        short_string().prop_map(|validator_address| TxPayload::ReportMetrics { validator_address }),
        (
            short_string(),
            short_string(),
            arb_evidence_type(),
            short_string(),
            short_string()
        )
            .prop_map(|(creator, subject_address, evidence_type, action_id, metadata)| {
                TxPayload::Audit {
                    msg: AuditMsg::SubmitEvidence(MsgSubmitEvidence {
                        creator,
                        subject_address,
                        evidence_type,
                        action_id,
                        metadata,
                    }),
                }
            }),
        (short_string(), 0u64..1_000).prop_map(|(authority, epoch_length_blocks)| {
            TxPayload::Audit {
                msg: AuditMsg::UpdateParams(MsgUpdateParams {
                    authority,
                    params: Params {
                        epoch_length_blocks,
                        ..Params::default()
                    },
                }),
            }
        }),
    ]
}

fn arb_tx() -> impl Strategy<Value = Tx> {
    (
        prop_oneof![Just("lumera-devnet".to_string()), short_string()],
        short_string(),
        arb_payload(),
    )
        .prop_map(|(chain_id, signer, payload)| Tx {
            chain_id,
            signer,
            payload,
        })
}

fn block(height: u64, transactions: Vec<Tx>) -> Block {
    Block {
        header: BlockHeader {
            parent_hash: [0u8; 32],
            height,
            timestamp: 0,
        },
        transactions,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn garbage_txs_are_rejected_without_side_effects(txs in prop::collection::vec(arb_tx(), 0..12)) {
        let fuzzed = from_genesis(GenesisConfig::devnet().unwrap()).unwrap();
        let clean = from_genesis(GenesisConfig::devnet().unwrap()).unwrap();

        let result = apply_block(&fuzzed, &block(1, txs.clone())).unwrap();
        let expected = apply_block(&clean, &block(1, vec![])).unwrap();

        prop_assert_eq!(result.tx_results.len(), txs.len());
        prop_assert!(result.tx_results.iter().all(|r| !r.is_ok()));
        prop_assert_eq!(result.state_root, expected.state_root);
    }
}
