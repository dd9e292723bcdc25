use serde_json::Value;
use std::fs;
use std::path::Path;
use tally_consensus::AuthorizedKeys;
use tally_core::{Block, Keypair, UsageUpdate, ZERO_HASH};
use tally_ledger::{AppendError, Ledger, VerificationFailureKind};
use tally_storage::{ChainPersistence, JsonChainFile, MemoryChainStore, SledChainStore, Storage};

struct Authority {
    alice: Keypair,
    bob: Keypair,
    carol: Keypair,
    authorized: AuthorizedKeys,
}

impl Authority {
    fn new() -> Self {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let carol = Keypair::generate();
        let authorized =
            AuthorizedKeys::from_keys([&alice.public_key, &bob.public_key, &carol.public_key]);
        Self {
            alice,
            bob,
            carol,
            authorized,
        }
    }
}

fn extend(ledger: &Ledger, auth: &Authority, subject: &str, old: u64, new: u64) -> String {
    let block = ledger
        .build_next(
            UsageUpdate::new(subject, old, new, "admin"),
            [&auth.alice, &auth.bob],
        )
        .unwrap();
    ledger.append(block, &auth.authorized, 2).unwrap()
}

fn rewrite_author(chain_path: &Path, index: usize) {
    let mut chain: Value = serde_json::from_str(&fs::read_to_string(chain_path).unwrap()).unwrap();
    let author = chain[index]["author"].as_str().unwrap().to_string();
    let mut bytes = author.into_bytes();
    bytes[0] ^= 0x01;
    chain[index]["author"] = Value::from(String::from_utf8(bytes).unwrap());
    fs::write(chain_path, serde_json::to_string_pretty(&chain).unwrap()).unwrap();
}

#[test]
fn test_genesis_then_tamper_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let chain_path = dir.path().join("chain.json");
    let auth = Authority::new();

    let ledger = Ledger::open(JsonChainFile::new(&chain_path)).unwrap();
    assert!(ledger.is_empty());

    let genesis = ledger
        .build_next(
            UsageUpdate::new("printer-3", 0, 10, "admin"),
            [&auth.alice, &auth.bob],
        )
        .unwrap();
    assert_eq!(genesis.prev_hash, ZERO_HASH);

    let tip = ledger.append(genesis, &auth.authorized, 2).unwrap();
    assert_eq!(ledger.tip_hash(), tip);
    assert_eq!(ledger.verify_all(&auth.authorized, 2).summary(), (true, None));

    rewrite_author(&chain_path, 0);

    let reopened = Ledger::open(JsonChainFile::new(&chain_path)).unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(
        reopened.verify_all(&auth.authorized, 2).summary(),
        (false, Some(0))
    );
}

#[test]
fn test_persisted_chain_reloads_and_extends() {
    let dir = tempfile::tempdir().unwrap();
    let chain_path = dir.path().join("chain.json");
    let auth = Authority::new();

    let first = {
        let ledger = Ledger::open(JsonChainFile::new(&chain_path)).unwrap();
        extend(&ledger, &auth, "a", 0, 4)
    };

    let ledger = Ledger::open(JsonChainFile::new(&chain_path)).unwrap();
    assert_eq!(ledger.tip_hash(), first);
    extend(&ledger, &auth, "a", 4, 6);

    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger.usage().current("a"), 6);
    assert_eq!(ledger.verify_all(&auth.authorized, 2).summary(), (true, None));
}

/// Two ledgers over one store, each unaware of the other's appends.
fn shared_store_race(a: &Ledger, b: &Ledger, auth: &Authority) {
    let genesis_a = a
        .build_next(UsageUpdate::new("can-1", 0, 1, "admin"), [&auth.alice, &auth.bob])
        .unwrap();
    let genesis_b = b
        .build_next(UsageUpdate::new("can-2", 0, 1, "admin"), [&auth.alice, &auth.bob])
        .unwrap();

    a.append(genesis_a.clone(), &auth.authorized, 2).unwrap();
    let err = b.append(genesis_b, &auth.authorized, 2).unwrap_err();
    match &err {
        AppendError::StaleTip { expected, actual } => {
            assert_eq!(expected, &genesis_a.hash);
            assert_eq!(actual, ZERO_HASH);
        }
        other => panic!("expected stale tip, got {other:?}"),
    }
    assert!(err.is_retryable());

    // The loser picked up the winner's block and can build on it.
    assert_eq!(b.tip_hash(), genesis_a.hash);
    let next = extend(b, auth, "can-2", 0, 1);
    assert_eq!(b.len(), 2);
    assert_eq!(b.tip_hash(), next);
}

#[test]
fn test_two_ledgers_on_one_chain_file() {
    let dir = tempfile::tempdir().unwrap();
    let chain_path = dir.path().join("chain.json");
    let auth = Authority::new();

    let a = Ledger::open(JsonChainFile::new(&chain_path)).unwrap();
    let b = Ledger::open(JsonChainFile::new(&chain_path)).unwrap();
    shared_store_race(&a, &b, &auth);

    let on_disk = JsonChainFile::new(&chain_path).load_chain().unwrap();
    let subjects: Vec<&str> = on_disk.iter().map(|b| b.subject_id.as_str()).collect();
    assert_eq!(subjects, ["can-1", "can-2"]);

    let reopened = Ledger::open(JsonChainFile::new(&chain_path)).unwrap();
    assert_eq!(reopened.verify_all(&auth.authorized, 2).summary(), (true, None));
}

#[test]
fn test_two_ledgers_on_one_sled_db() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(dir.path().join("chain.db")).unwrap();
    let auth = Authority::new();

    // Both handles share the same open database.
    let a = Ledger::open(SledChainStore::new(storage.clone())).unwrap();
    let b = Ledger::open(SledChainStore::new(storage.clone())).unwrap();
    shared_store_race(&a, &b, &auth);

    let persisted = SledChainStore::new(storage).load_chain().unwrap();
    let subjects: Vec<&str> = persisted.iter().map(|b| b.subject_id.as_str()).collect();
    assert_eq!(subjects, ["can-1", "can-2"]);
}

type Mutation = Box<dyn Fn(&mut Block)>;

fn mutation(f: impl Fn(&mut Block) + 'static) -> Mutation {
    Box::new(f)
}

#[test]
fn test_every_field_is_covered() {
    let auth = Authority::new();
    let ledger = Ledger::in_memory();
    extend(&ledger, &auth, "a", 0, 10);
    extend(&ledger, &auth, "a", 10, 20);
    extend(&ledger, &auth, "b", 0, 1);
    let pristine = ledger.chain();

    let other_signature = auth.carol.sign(pristine[1].hash.as_bytes()).to_hex();
    let outsider = Keypair::generate().public_key_pem().unwrap();

    let mutations: Vec<(&str, Mutation)> = vec![
        ("timestamp", mutation(|b| b.timestamp = "2001-01-01T00:00:00Z".into())),
        ("subject_id", mutation(|b| b.subject_id.push('x'))),
        ("old_value", mutation(|b| b.old_value -= 1)),
        ("new_value", mutation(|b| b.new_value += 1)),
        ("author", mutation(|b| b.author = "admim".into())),
        ("prev_hash", mutation(|b| b.prev_hash = "1".repeat(64))),
        ("hash", mutation(|b| b.hash = "2".repeat(64))),
        ("signatures", mutation(move |b| b.signatures[0] = other_signature.clone())),
        ("signer_keys", mutation(move |b| b.signer_keys[1] = outsider.clone())),
    ];

    for (field, mutate) in mutations {
        let mut chain = pristine.clone();
        mutate(&mut chain[1]);

        let tampered = Ledger::open(MemoryChainStore::with_blocks(chain)).unwrap();
        assert_eq!(
            tampered.verify_all(&auth.authorized, 2).first_invalid_index(),
            Some(1),
            "mutating {field} went unnoticed"
        );
    }
}

#[test]
fn test_quorum_strictness() {
    let auth = Authority::new();
    let outsider = Keypair::generate();

    // One authorized signature plus an unauthorized one.
    let ledger = Ledger::in_memory();
    let block = ledger
        .build_next(UsageUpdate::new("a", 0, 1, "admin"), [&auth.alice, &outsider])
        .unwrap();
    assert!(matches!(
        ledger.append(block, &auth.authorized, 2),
        Err(AppendError::QuorumNotMet { valid: 1, required: 2 })
    ));

    // The same key twice counts once.
    let block = ledger
        .build_next(UsageUpdate::new("a", 0, 1, "admin"), [&auth.alice, &auth.alice])
        .unwrap();
    assert!(matches!(
        ledger.append(block, &auth.authorized, 2),
        Err(AppendError::QuorumNotMet { valid: 1, required: 2 })
    ));

    // Two valid distinct signatures plus a garbage one.
    let mut block = ledger
        .build_next(UsageUpdate::new("a", 0, 1, "admin"), [&auth.alice, &auth.bob])
        .unwrap();
    block.signatures.push("00".repeat(64));
    block.signer_keys.push(auth.carol.public_key_pem().unwrap());
    assert!(ledger.append(block, &auth.authorized, 2).is_ok());
}

#[test]
fn test_cosigned_block_accepted() {
    let auth = Authority::new();
    let ledger = Ledger::in_memory();

    let mut block = ledger
        .build_next(UsageUpdate::new("a", 0, 1, "admin"), [&auth.alice])
        .unwrap();
    let hash = block.hash.clone();
    block.add_signature(&auth.carol).unwrap();
    assert_eq!(block.hash, hash);

    assert_eq!(ledger.append(block, &auth.authorized, 2).unwrap(), hash);
}

#[test]
fn test_non_increasing_rejected_as_malformed() {
    let auth = Authority::new();
    let ledger = Ledger::in_memory();

    assert!(ledger
        .build_next(UsageUpdate::new("a", 5, 5, "admin"), [&auth.alice, &auth.bob])
        .is_err());

    let mut block = ledger
        .build_next(UsageUpdate::new("a", 5, 6, "admin"), [&auth.alice, &auth.bob])
        .unwrap();
    block.new_value = 4;
    assert!(matches!(
        ledger.append(block, &auth.authorized, 2),
        Err(AppendError::MalformedBlock(_))
    ));
}

#[test]
fn test_wire_format_roundtrip_through_append() {
    let auth = Authority::new();
    let ledger = Ledger::in_memory();
    let block = ledger
        .build_next(UsageUpdate::new("a", 0, 1, "admin"), [&auth.alice, &auth.bob])
        .unwrap();

    let decoded = Block::from_json(&block.to_json().unwrap()).unwrap();
    assert_eq!(decoded, block);
    ledger.append(decoded, &auth.authorized, 2).unwrap();

    let verification = ledger.verify_all(&auth.authorized, 3);
    assert!(matches!(
        verification.first_invalid.map(|f| f.kind),
        Some(VerificationFailureKind::QuorumNotMet { valid: 2, required: 3 })
    ));
}
