use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::LevelFilter;

use vertex_bft::{
    events::CommitVertexEvent,
    pacemaker::TimeoutPolicy,
    replica::{Configuration, Replica, ReplicaSpec},
    types::{basic::BufferSize, crypto_primitives::SigningKey, validators::ValidatorSet},
};

mod common;

use common::{
    app::{CounterMempool, LedgerLog},
    keys::{keypairs, signing_keys, validator_set},
    logging::setup_logger,
    mem_db::MemDB,
    network::{mock_network, NetworkStub},
};

struct Node {
    ledger: LedgerLog,
    mempool: CounterMempool,
    commits: Arc<AtomicU64>,
    _replica: Replica,
}

impl Node {
    fn new(signing_key: SigningKey, network: NetworkStub, validator_set: ValidatorSet) -> Node {
        let ledger = LedgerLog::default();
        let mempool = CounterMempool::default();
        let commits = Arc::new(AtomicU64::new(0));

        let configuration = Configuration::builder()
            .me(signing_key)
            .sync_request_limit(10)
            .sync_response_timeout(Duration::from_millis(500))
            .sync_max_retries(3)
            .message_buffer_capacity(BufferSize::new(1024))
            .timeout_policy(TimeoutPolicy::Exponential {
                base: Duration::from_millis(500),
                rate: 2.0,
                max_exponent: 3,
            })
            .log_events(true)
            .build();

        let commit_counter = commits.clone();
        let replica = ReplicaSpec::builder()
            .network(network)
            .kv_store(MemDB::new())
            .state_computer(ledger.clone())
            .mempool(mempool.clone())
            .validator_set(validator_set)
            .configuration(configuration)
            .on_commit_vertex(move |_: &CommitVertexEvent| {
                commit_counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .start()
            .unwrap();

        Node {
            ledger,
            mempool,
            commits,
            _replica: replica,
        }
    }
}

/// Starts four replicas and waits for every one of them to commit the same chain of vertices.
#[test]
fn replicas_commit_the_same_chain() {
    setup_logger(LevelFilter::Info);

    let signing_keys = signing_keys(4);
    let validator_set = validator_set(&keypairs(&signing_keys));
    let networks = mock_network(signing_keys.iter().map(|key| key.verifying_key()));

    let nodes: Vec<Node> = signing_keys
        .into_iter()
        .zip(networks)
        .map(|(signing_key, network)| Node::new(signing_key, network, validator_set.clone()))
        .collect();

    let deadline = Instant::now() + Duration::from_secs(60);
    while nodes.iter().any(|node| node.ledger.executed().len() < 5) {
        assert!(Instant::now() < deadline, "replicas did not make progress");
        thread::sleep(Duration::from_millis(100));
    }

    // Every replica executed the same prefix of vertices, in strictly increasing views.
    let ledgers: Vec<_> = nodes.iter().map(|node| node.ledger.executed()).collect();
    for ledger in &ledgers {
        assert_eq!(ledger[..5], ledgers[0][..5]);
        assert!(ledger.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    // Commit handlers and mempools saw the commits too. Handlers run on another thread, so they may trail.
    while nodes
        .iter()
        .any(|node| node.commits.load(Ordering::SeqCst) < 5)
    {
        assert!(Instant::now() < deadline, "commit events were not delivered");
        thread::sleep(Duration::from_millis(50));
    }
    for node in &nodes {
        assert!(node.mempool.committed().len() >= 5);
    }
}
