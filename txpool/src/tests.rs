use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use account::{create_account, sign_tx};
use codec::Codec;
use primitive_types::H256;
use traits::{Blockchain, StateDB};
use types::account::Account;
use types::block::{Block, BlockHeader};
use types::events::ChainHeadEvent;
use types::signer::Signer;
use types::tx::{SignedTransaction, TransactionData, TxOutput};
use types::{native_asset, Address, AssetId};

use crate::*;

const CHAIN_ID: u64 = 1337;
const TEST_GAS_LIMIT: u64 = 1_000_000;

#[derive(Default)]
struct DummyStateDB {
    nonces: DashMap<Address, u64>,
    balances: DashMap<(Address, AssetId), u128>,
}

impl DummyStateDB {
    fn set_nonce(&self, address: Address, nonce: u64) {
        self.nonces.insert(address, nonce);
    }

    fn set_balance(&self, address: Address, asset: AssetId, amount: u128) {
        self.balances.insert((address, asset), amount);
    }
}

impl StateDB for DummyStateDB {
    fn nonce(&self, address: &Address) -> u64 {
        self.nonces.get(address).map(|kv| *kv).unwrap_or_default()
    }

    fn balance(&self, address: &Address, asset: &AssetId) -> u128 {
        self.balances
            .get(&(*address, *asset))
            .map(|kv| *kv)
            .unwrap_or_default()
    }
}

struct DummyChain {
    head: RwLock<Block>,
    blocks: DashMap<H256, Block>,
    state: Arc<DummyStateDB>,
    subscribers: Mutex<Vec<UnboundedSender<ChainHeadEvent>>>,
}

impl DummyChain {
    fn new(state: Arc<DummyStateDB>) -> Self {
        let genesis = Block::new(
            BlockHeader {
                parent_hash: H256::zero(),
                merkle_root: H256::zero(),
                state_root: H256::zero(),
                coinbase: Address::zero(),
                level: 0,
                time: 0,
                gas_limit: TEST_GAS_LIMIT,
                nonce: 0,
            },
            vec![],
        );
        let blocks = DashMap::new();
        blocks.insert(genesis.hash(), genesis.clone());
        Self {
            head: RwLock::new(genesis),
            blocks,
            state,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn genesis(&self) -> Block {
        self.blocks
            .iter()
            .find(|kv| kv.value().level() == 0)
            .map(|kv| kv.value().clone())
            .unwrap()
    }

    fn insert_block(&self, block: &Block) {
        self.blocks.insert(block.hash(), block.clone());
    }

    fn set_head(&self, block: Block) {
        *self.head.write().unwrap() = block;
    }

    fn send_head(&self, block: Block) {
        let subs = self.subscribers.lock().unwrap();
        for sub in subs.iter() {
            let _ = sub.send(ChainHeadEvent {
                block: block.clone(),
            });
        }
    }
}

impl Blockchain for DummyChain {
    fn current_block(&self) -> Result<Block> {
        self.head
            .read()
            .map(|head| head.clone())
            .map_err(|_| anyhow!("chain head lock poisoned"))
    }

    fn get_block(&self, hash: &H256, _level: u64) -> Result<Option<Block>> {
        Ok(self.blocks.get(hash).map(|kv| kv.value().clone()))
    }

    fn state_at(&self, _root: &H256) -> Result<Arc<dyn StateDB>> {
        Ok(self.state.clone())
    }

    fn subscribe_chain_head(&self) -> UnboundedReceiver<ChainHeadEvent> {
        let (sender, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(sender);
        rx
    }
}

fn make_block(parent: &Block, tag: u8, txs: Vec<SignedTransaction>) -> Block {
    Block::new(
        BlockHeader {
            parent_hash: parent.hash(),
            merkle_root: H256::repeat_byte(tag),
            state_root: H256::zero(),
            coinbase: Address::zero(),
            level: parent.level() + 1,
            time: parent.level() as u32 + 1,
            gas_limit: TEST_GAS_LIMIT,
            nonce: 0,
        },
        txs,
    )
}

fn test_config() -> TxPoolConfig {
    TxPoolConfig {
        journal: String::new(),
        ..Default::default()
    }
}

fn setup_with(config: TxPoolConfig) -> (Arc<TxPool>, Arc<DummyStateDB>, Arc<DummyChain>) {
    let state = Arc::new(DummyStateDB::default());
    let chain = Arc::new(DummyChain::new(state.clone()));
    let pool = TxPool::new(config, CHAIN_ID, chain.clone()).unwrap();
    (pool, state, chain)
}

fn setup() -> (Arc<TxPool>, Arc<DummyStateDB>, Arc<DummyChain>) {
    setup_with(test_config())
}

fn funded_account(state: &DummyStateDB) -> Account {
    let account = create_account();
    state.set_balance(account.address, native_asset(), 1_000_000);
    account
}

fn transfer(account: &Account, nonce: u64, gas_price: u128) -> SignedTransaction {
    priced_transfer(account, nonce, gas_price, 21_000, 100)
}

fn priced_transfer(
    account: &Account,
    nonce: u64,
    gas_price: u128,
    gas: u64,
    value: u128,
) -> SignedTransaction {
    sign_tx(
        account,
        &Signer::new(CHAIN_ID),
        TransactionData {
            nonce,
            gas_price,
            gas,
            inputs: vec![],
            outputs: vec![TxOutput {
                asset: native_asset(),
                to: Some(Address::repeat_byte(0xEE)),
                value,
            }],
            extra: vec![],
            v: 0,
            r: Default::default(),
            s: Default::default(),
        },
    )
    .unwrap()
}

fn pool_error(err: anyhow::Error) -> TxPoolError {
    err.downcast_ref::<TxPoolError>()
        .cloned()
        .unwrap_or_else(|| panic!("not a pool error: {err}"))
}

/// Checks the cross-index consistency invariants of the pool.
fn validate_pool_internals(pool: &TxPool) {
    let mut inner = pool.inner.write().unwrap();
    let inner = &mut *inner;

    let (pending, queued) = inner.stats();
    assert_eq!(
        inner.all.count(),
        pending + queued,
        "lookup count diverged from pending + queued"
    );

    let local_txs = inner
        .all
        .iter()
        .filter(|tx| inner.locals.contains_sender(tx))
        .count();
    let live = inner.priced.len() as i64 - inner.priced.stales() as i64;
    assert_eq!(
        live,
        (inner.all.count() - local_txs) as i64,
        "price index live size diverged from remote lookup count"
    );

    for (addr, list) in inner.pending.iter() {
        let start = inner.current_state.nonce(addr);
        for i in 0..list.len() as u64 {
            assert!(
                list.get(start + i).is_some(),
                "pending list has a gap at {}",
                start + i
            );
        }
    }
    for (addr, list) in inner.queue.iter() {
        let current = inner.current_state.nonce(addr);
        for nonce in list.nonces() {
            assert!(nonce >= current, "queued nonce below account nonce");
            let overlapping = inner
                .pending
                .get(addr)
                .map(|pending| pending.get(nonce).is_some())
                .unwrap_or(false);
            assert!(!overlapping, "nonce present in both pending and queue");
        }
    }

    let expected: Vec<(Address, u64)> = inner
        .pending
        .iter()
        .filter_map(|(addr, list)| list.last().map(|tx| (*addr, tx.nonce() + 1)))
        .collect();
    for (addr, nonce) in expected {
        assert_eq!(
            inner.pending_nonces.get(&addr),
            nonce,
            "tracked pending nonce diverged from the list"
        );
    }
}

#[tokio::test]
async fn test_admission_and_promotion() {
    let (pool, state, _chain) = setup();
    let alice = funded_account(&state);
    let mut events = pool.subscribe_new_txs();

    let tx = transfer(&alice, 0, 1);
    let hash = tx.hash();
    pool.add_remote(tx).unwrap();

    assert_eq!(pool.stats().unwrap(), (1, 0));
    assert!(pool.get(&hash).unwrap().is_some());
    let event = events.try_recv().expect("promotion event not fired");
    assert_eq!(event.txs.len(), 1);
    assert_eq!(event.txs[0].hash(), hash);
    assert!(events.try_recv().is_none());
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_gap_then_fill() {
    let (pool, state, _chain) = setup();
    let alice = funded_account(&state);
    let mut events = pool.subscribe_new_txs();

    pool.add_remote(transfer(&alice, 1, 1)).unwrap();
    assert_eq!(pool.stats().unwrap(), (0, 1));
    assert!(events.try_recv().is_none());

    pool.add_remote(transfer(&alice, 0, 1)).unwrap();
    assert_eq!(pool.stats().unwrap(), (2, 0));
    let event = events.try_recv().expect("promotion event not fired");
    let nonces: Vec<u64> = event.txs.iter().map(|tx| tx.nonce()).collect();
    assert_eq!(nonces, vec![0, 1]);
    assert!(events.try_recv().is_none());
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_same_nonce_replacement() {
    let (pool, state, _chain) = setup();
    let alice = funded_account(&state);
    let mut events = pool.subscribe_new_txs();

    pool.add_remote(transfer(&alice, 0, 100)).unwrap();
    assert_eq!(events.try_recv().map(|ev| ev.txs.len()), Some(1));

    // A 9% bump is below the required 10%.
    let err = pool.add_remote(transfer(&alice, 0, 109)).unwrap_err();
    assert_eq!(pool_error(err), TxPoolError::ReplaceUnderpriced);

    let replacement = transfer(&alice, 0, 110);
    let hash = replacement.hash();
    pool.add_remote(replacement).unwrap();
    assert_eq!(pool.stats().unwrap(), (1, 0));
    assert_eq!(
        pool.get(&hash).unwrap().map(|tx| tx.gas_price()),
        Some(110)
    );
    let event = events.try_recv().expect("replacement event not fired");
    assert_eq!(event.txs[0].hash(), hash);
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_global_cap_discards_cheapest() {
    let config = TxPoolConfig {
        global_slots: 4,
        global_queue: 0,
        account_slots: 4,
        ..test_config()
    };
    let (pool, state, _chain) = setup_with(config);

    let mut cheapest_hash = None;
    for price in 1_u128..=4 {
        let account = funded_account(&state);
        let tx = transfer(&account, 0, price);
        if price == 1 {
            cheapest_hash = Some(tx.hash());
        }
        pool.add_remote(tx).unwrap();
    }
    assert_eq!(pool.stats().unwrap(), (4, 0));

    // A fee-3 newcomer beats the fee-1 incumbent, which gets discarded.
    let newcomer = funded_account(&state);
    pool.add_remote(transfer(&newcomer, 0, 3)).unwrap();
    assert_eq!(pool.stats().unwrap(), (4, 0));
    assert!(pool.get(&cheapest_hash.unwrap()).unwrap().is_none());

    // Now the cheapest resident costs 2; a fee-1 newcomer is underpriced.
    let too_cheap = funded_account(&state);
    let err = pool.add_remote(transfer(&too_cheap, 0, 1)).unwrap_err();
    assert_eq!(pool_error(err), TxPoolError::Underpriced);
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_reorg_reinjects_dropped_transactions() {
    let (pool, state, chain) = setup();
    let alice = funded_account(&state);

    let included = transfer(&alice, 0, 1);
    let hash = included.hash();

    let genesis = chain.genesis();
    let b1 = make_block(&genesis, 1, vec![included]);
    let b1_prime = make_block(&genesis, 2, vec![]);
    chain.insert_block(&b1);
    chain.insert_block(&b1_prime);

    // The head moves from b1 to its sibling; the transaction b1 carried is
    // no longer on the canonical chain and must resurface in the pool.
    chain.set_head(b1_prime.clone());
    pool.locked_reset(Some(*b1.header()), Some(*b1_prime.header()))
        .unwrap();

    assert_eq!(pool.stats().unwrap(), (1, 0));
    assert!(pool.get(&hash).unwrap().is_some());
    assert_eq!(pool.status(&[hash]).unwrap(), vec![TxStatus::Pending]);
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_stale_queued_accounts_are_evicted() {
    let config = TxPoolConfig {
        lifetime: Duration::from_millis(0),
        ..test_config()
    };
    let (pool, state, _chain) = setup_with(config);

    let remote = funded_account(&state);
    let local = funded_account(&state);
    // Gapped nonces keep both accounts queued.
    pool.add_remote(transfer(&remote, 2, 1)).unwrap();
    pool.add_local(transfer(&local, 2, 1)).unwrap();
    assert_eq!(pool.stats().unwrap(), (0, 2));

    std::thread::sleep(Duration::from_millis(5));
    pool.inner.write().unwrap().evict();

    let (_, queued) = pool.stats().unwrap();
    assert_eq!(queued, 1);
    let (_, local_queue) = pool.content_from(&local.address).unwrap();
    assert_eq!(local_queue.len(), 1);
    let (_, remote_queue) = pool.content_from(&remote.address).unwrap();
    assert!(remote_queue.is_empty());
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_journal_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir
        .path()
        .join("transactions.journal")
        .to_string_lossy()
        .into_owned();
    let config = TxPoolConfig {
        journal: journal_path.clone(),
        ..Default::default()
    };

    let state = Arc::new(DummyStateDB::default());
    let chain = Arc::new(DummyChain::new(state.clone()));
    let alice = funded_account(&state);

    let pool = TxPool::new(config.clone(), CHAIN_ID, chain.clone()).unwrap();
    pool.add_local(transfer(&alice, 0, 1)).unwrap();
    pool.add_local(transfer(&alice, 1, 1)).unwrap();
    assert_eq!(pool.stats().unwrap(), (2, 0));
    pool.stop().await;

    let reborn = TxPool::new(config, CHAIN_ID, chain).unwrap();
    assert_eq!(reborn.stats().unwrap(), (2, 0));
    validate_pool_internals(&reborn);
    reborn.stop().await;
}

#[tokio::test]
async fn test_duplicate_is_rejected() {
    let (pool, state, _chain) = setup();
    let alice = funded_account(&state);
    let mut events = pool.subscribe_new_txs();

    let tx = transfer(&alice, 0, 1);
    pool.add_remote(tx.clone()).unwrap();
    let err = pool.add_remote(tx).unwrap_err();
    assert_eq!(pool_error(err), TxPoolError::AlreadyKnown);

    assert_eq!(pool.stats().unwrap(), (1, 0));
    assert_eq!(events.try_recv().map(|ev| ev.txs.len()), Some(1));
    assert!(events.try_recv().is_none());
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_status_reporting() {
    let (pool, state, _chain) = setup();
    let alice = funded_account(&state);

    let pending = transfer(&alice, 0, 1);
    let queued = transfer(&alice, 5, 1);
    let pending_hash = pending.hash();
    let queued_hash = queued.hash();
    pool.add_remote(pending).unwrap();
    pool.add_remote(queued).unwrap();

    let status = pool
        .status(&[pending_hash, queued_hash, H256::repeat_byte(0xAB)])
        .unwrap();
    assert_eq!(
        status,
        vec![TxStatus::Pending, TxStatus::Queued, TxStatus::Unknown]
    );
    pool.stop().await;
}

#[tokio::test]
async fn test_validation_rejections() {
    let (pool, state, _chain) = setup();
    let alice = funded_account(&state);

    // Gas above the block limit.
    let err = pool
        .add_remote(priced_transfer(&alice, 0, 1, TEST_GAS_LIMIT + 1, 0))
        .unwrap_err();
    assert_eq!(pool_error(err), TxPoolError::GasLimit);

    // Below the intrinsic charge for one output.
    let err = pool
        .add_remote(priced_transfer(&alice, 0, 1, 20_000, 0))
        .unwrap_err();
    assert_eq!(pool_error(err), TxPoolError::IntrinsicGas);

    // Cannot cover gas * price + value.
    let err = pool
        .add_remote(priced_transfer(&alice, 0, 1, 21_000, 2_000_000))
        .unwrap_err();
    assert_eq!(
        pool_error(err),
        TxPoolError::InsufficientFunds {
            asset: native_asset()
        }
    );

    // Remote below the pool price floor.
    let err = pool.add_remote(transfer(&alice, 0, 0)).unwrap_err();
    assert_eq!(pool_error(err), TxPoolError::Underpriced);

    // Stale nonce.
    state.set_nonce(alice.address, 5);
    let err = pool.add_remote(transfer(&alice, 1, 1)).unwrap_err();
    assert_eq!(pool_error(err), TxPoolError::NonceTooLow);

    assert_eq!(pool.stats().unwrap(), (0, 0));
    pool.stop().await;
}

#[tokio::test]
async fn test_multi_asset_balance_validation() {
    let (pool, state, _chain) = setup();
    let alice = funded_account(&state);
    let token = AssetId::repeat_byte(0x77);

    let build = |account: &Account| {
        sign_tx(
            account,
            &Signer::new(CHAIN_ID),
            TransactionData {
                nonce: 0,
                gas_price: 1,
                gas: 42_000,
                inputs: vec![],
                outputs: vec![
                    TxOutput {
                        asset: native_asset(),
                        to: Some(Address::repeat_byte(0xEE)),
                        value: 10,
                    },
                    TxOutput {
                        asset: token,
                        to: Some(Address::repeat_byte(0xEF)),
                        value: 25,
                    },
                ],
                extra: vec![],
                v: 0,
                r: Default::default(),
                s: Default::default(),
            },
        )
        .unwrap()
    };

    let err = pool.add_remote(build(&alice)).unwrap_err();
    assert_eq!(pool_error(err), TxPoolError::InsufficientFunds { asset: token });

    state.set_balance(alice.address, token, 25);
    pool.add_remote(build(&alice)).unwrap();
    assert_eq!(pool.stats().unwrap(), (1, 0));
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_set_gas_price_drops_remote_only() {
    let (pool, state, _chain) = setup();
    let cheap_remote = funded_account(&state);
    let rich_remote = funded_account(&state);
    let cheap_local = funded_account(&state);

    pool.add_remote(transfer(&cheap_remote, 0, 1)).unwrap();
    pool.add_remote(transfer(&rich_remote, 0, 5)).unwrap();
    pool.add_local(transfer(&cheap_local, 0, 1)).unwrap();
    assert_eq!(pool.stats().unwrap(), (3, 0));

    pool.set_gas_price(3).unwrap();
    assert_eq!(pool.stats().unwrap(), (2, 0));
    let (remote_pending, _) = pool.content_from(&cheap_remote.address).unwrap();
    assert!(remote_pending.is_empty());
    let (local_pending, _) = pool.content_from(&cheap_local.address).unwrap();
    assert_eq!(local_pending.len(), 1);

    // New remote submissions below the floor bounce straight off validation.
    let late = funded_account(&state);
    let err = pool.add_remote(transfer(&late, 0, 2)).unwrap_err();
    assert_eq!(pool_error(err), TxPoolError::Underpriced);
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_queue_cap_per_account() {
    let config = TxPoolConfig {
        account_queue: 2,
        ..test_config()
    };
    let (pool, state, _chain) = setup_with(config);
    let alice = funded_account(&state);

    for nonce in 10..15 {
        pool.add_remote(transfer(&alice, nonce, 1)).unwrap();
    }
    assert_eq!(pool.stats().unwrap(), (0, 2));
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_queue_overflow_sheds_oldest_account_first() {
    let config = TxPoolConfig {
        global_queue: 4,
        ..test_config()
    };
    let (pool, state, _chain) = setup_with(config);
    let older = funded_account(&state);
    let newer = funded_account(&state);

    // Gapped nonces keep everything queued; `older` enqueues first and so
    // carries the older heartbeat.
    for nonce in 10..13 {
        pool.add_remote(transfer(&older, nonce, 1)).unwrap();
    }
    std::thread::sleep(Duration::from_millis(5));
    for nonce in 10..13 {
        pool.add_remote(transfer(&newer, nonce, 1)).unwrap();
    }

    // The deficit came out of the idle account's highest nonces, the fresh
    // one is untouched.
    assert_eq!(pool.stats().unwrap(), (0, 4));
    let (_, older_queue) = pool.content_from(&older.address).unwrap();
    let older_nonces: Vec<u64> = older_queue.iter().map(|tx| tx.nonce()).collect();
    assert_eq!(older_nonces, vec![10]);
    let (_, newer_queue) = pool.content_from(&newer.address).unwrap();
    assert_eq!(newer_queue.len(), 3);

    // A third wave deepens the deficit: the oldest account fits in it and is
    // dropped whole, then the next-oldest loses its highest nonce.
    std::thread::sleep(Duration::from_millis(5));
    let third = funded_account(&state);
    let txs: Vec<SignedTransaction> = (10..12).map(|nonce| transfer(&third, nonce, 1)).collect();
    let results = pool.add_remotes(txs).unwrap();
    assert!(results.iter().all(|res| res.is_ok()));

    assert_eq!(pool.stats().unwrap(), (0, 4));
    let (_, older_queue) = pool.content_from(&older.address).unwrap();
    assert!(older_queue.is_empty());
    let (_, newer_queue) = pool.content_from(&newer.address).unwrap();
    let newer_nonces: Vec<u64> = newer_queue.iter().map(|tx| tx.nonce()).collect();
    assert_eq!(newer_nonces, vec![10, 11]);
    let (_, third_queue) = pool.content_from(&third.address).unwrap();
    assert_eq!(third_queue.len(), 2);
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_pending_overflow_trims_spammers() {
    let config = TxPoolConfig {
        global_slots: 4,
        account_slots: 2,
        ..test_config()
    };
    let (pool, state, _chain) = setup_with(config);
    let spammer = funded_account(&state);

    let txs: Vec<SignedTransaction> = (0..6).map(|nonce| transfer(&spammer, nonce, 1)).collect();
    let results = pool.add_remotes(txs).unwrap();
    assert!(results.iter().all(|res| res.is_ok()));

    let (pending, _) = pool.stats().unwrap();
    assert_eq!(pending, 4);
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_reset_demotes_included_transactions() {
    let (pool, state, chain) = setup();
    let alice = funded_account(&state);

    pool.add_remote(transfer(&alice, 0, 1)).unwrap();
    pool.add_remote(transfer(&alice, 1, 1)).unwrap();
    assert_eq!(pool.stats().unwrap(), (2, 0));

    // Pretend a new block included nonce 0.
    state.set_nonce(alice.address, 1);
    let head = chain.current_block().unwrap();
    pool.locked_reset(None, Some(*head.header())).unwrap();

    assert_eq!(pool.stats().unwrap(), (1, 0));
    let (pending, _) = pool.content_from(&alice.address).unwrap();
    assert_eq!(pending[0].nonce(), 1);
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_chain_head_event_triggers_reset() {
    let (pool, state, chain) = setup();
    let alice = funded_account(&state);

    pool.add_remote(transfer(&alice, 0, 1)).unwrap();
    assert_eq!(pool.stats().unwrap(), (1, 0));

    // A new head whose state has consumed nonce 0.
    state.set_nonce(alice.address, 1);
    let genesis = chain.genesis();
    let b1 = make_block(&genesis, 3, vec![]);
    chain.insert_block(&b1);
    chain.set_head(b1.clone());
    chain.send_head(b1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if pool.stats().unwrap() == (0, 0) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pool never processed the chain head event"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_no_locals_disables_exemptions() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("transactions.journal");
    let config = TxPoolConfig {
        no_locals: true,
        journal: journal_path.to_string_lossy().into_owned(),
        lifetime: Duration::from_millis(0),
        ..Default::default()
    };
    let (pool, state, _chain) = setup_with(config);
    let sender = funded_account(&state);

    // Submitted through the local entry point, but treated as remote.
    pool.add_local(transfer(&sender, 2, 1)).unwrap();
    assert_eq!(pool.stats().unwrap(), (0, 1));

    std::thread::sleep(Duration::from_millis(5));
    pool.inner.write().unwrap().evict();
    assert_eq!(pool.stats().unwrap(), (0, 0));

    // Journaling is disabled wholesale.
    assert!(pool.inner.read().unwrap().journal.is_none());
    assert!(!journal_path.exists());
    validate_pool_internals(&pool);
    pool.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (pool, _state, _chain) = setup();
    pool.stop().await;
    pool.stop().await;
}

#[test]
fn test_encode_decode_keeps_fingerprint() {
    let account = create_account();
    let tx = priced_transfer(&account, 3, 7, 30_000, 55);
    let decoded = SignedTransaction::decode(&tx.encode().unwrap()).unwrap();
    assert_eq!(tx.hash(), decoded.hash());
    assert_eq!(tx.nonce(), decoded.nonce());
    assert_eq!(tx.gas_price(), decoded.gas_price());
}

#[test]
fn test_intrinsic_gas_charges() {
    let account = create_account();
    let plain = priced_transfer(&account, 0, 1, 21_000, 0);
    assert_eq!(intrinsic_gas(&plain).unwrap(), TX_GAS);

    let create = sign_tx(
        &account,
        &Signer::new(CHAIN_ID),
        TransactionData {
            nonce: 0,
            gas_price: 1,
            gas: 100_000,
            inputs: vec![types::tx::TxInput {
                payload: vec![0, 0, 1, 2],
            }],
            outputs: vec![TxOutput {
                asset: native_asset(),
                to: None,
                value: 0,
            }],
            extra: vec![1],
            v: 0,
            r: Default::default(),
            s: Default::default(),
        },
    )
    .unwrap();
    // Creation surcharge, two zero bytes, two payload non-zeroes and one
    // non-zero extra byte.
    let expected = TX_GAS_CONTRACT_CREATION
        + 2 * TX_DATA_ZERO_GAS
        + 2 * TX_DATA_NON_ZERO_GAS
        + TX_DATA_NON_ZERO_GAS;
    assert_eq!(intrinsic_gas(&create).unwrap(), expected);
}
