use async_stream::stream;
use chrono::Local;
use csnlog_changelog::{
    ChangeRecord, ChangelogError, ChangelogStore, CursorOptions, DBCursor, EclEnabledDomains,
    EclMultiDomainDBCursor, MemoryChangelogStore, MultiDomainDBCursor,
};
use csnlog_core::{Csn, CsnGenerator, DomainId, GeneratorConfig, ReplicaId, ServerState, SystemClock};
use csnlog_state::{
    spawn_state_flusher, MemoryStateStore, PersistenceConfig, PersistentServerState, StorageError,
};
use futures::stream::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

type Changelog = MemoryChangelogStore<ChangeRecord>;
type EclCursor = EclMultiDomainDBCursor<Changelog, EclEnabledDomains>;
type DomainState = PersistentServerState<Arc<MemoryStateStore>>;

/// Replica id under which the changelog server persists each domain state.
const CHANGELOG_SERVER_ID: ReplicaId = 0;

/// Parameters of one simulation run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub num_replicas: usize,
    pub num_domains: usize,
    pub changes_per_replica: usize,
    /// The first `ecl_enabled_domains` domains are exposed through the
    /// external changelog; the others are dropped while reading.
    pub ecl_enabled_domains: usize,
    pub generator: GeneratorConfig,
    pub persistence: PersistenceConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            num_replicas: 4,
            num_domains: 3,
            changes_per_replica: 200,
            ecl_enabled_domains: 2,
            generator: GeneratorConfig::default(),
            persistence: PersistenceConfig {
                save_interval: Duration::from_millis(5),
                ..PersistenceConfig::default()
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Changelog error: {0}")]
    Changelog(#[from] ChangelogError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Replica task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Out of order: {current} read after {previous}")]
    OutOfOrder { previous: Csn, current: Csn },

    #[error("Expected {expected} changes, read {found}")]
    MissingChanges { expected: usize, found: usize },

    #[error("Saved state of {0} differs from memory")]
    StateMismatch(DomainId),
}

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub num_replicas: usize,
    pub num_domains: usize,
    pub changes_written: usize,
    pub changes_read: usize,
    pub resumed_at: usize,
    pub domains_dropped: usize,
    pub total_time: Duration,
    pub changes_per_second: f64,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Simulation Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Replicas:                  {:>30} ║", self.num_replicas);
        println!("║  Domains:                   {:>30} ║", self.num_domains);
        println!("║  Changes Written:           {:>30} ║", self.changes_written);
        println!("║  Changes Read (ECL):        {:>30} ║", self.changes_read);
        println!("║  Resumed After:             {:>30} ║", self.resumed_at);
        println!("║  Domains Dropped:           {:>30} ║", self.domains_dropped);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Changes/Second:            {:>30.0} ║", self.changes_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// Yields the domain index each successive change is written to
fn domain_picker(num_domains: usize, count: usize, seed: u64) -> impl Stream<Item = usize> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..count {
            yield rng.gen_range(0..num_domains);
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Write `changes_per_replica` changes from one replica, spread over the domains
async fn run_replica(
    replica_id: ReplicaId,
    config: Arc<SimulationConfig>,
    domains: Arc<Vec<DomainId>>,
    changelog: Arc<Changelog>,
    states: Arc<Vec<Arc<DomainState>>>,
) -> Result<usize, SimulationError> {
    let generator =
        CsnGenerator::with_config(replica_id, Arc::new(SystemClock), config.generator.clone());
    let mut targets = Box::pin(domain_picker(
        domains.len(),
        config.changes_per_replica,
        replica_id as u64,
    ));

    let mut written = 0;
    while let Some(index) = targets.next().await {
        let state = &states[index];
        // Catch up with what the other replicas published in this domain.
        generator.adjust_to_state(state.state());

        let csn = generator.new_csn();
        let payload = format!("replica {} change {} at {}", replica_id, written, timestamp());
        changelog.append(&domains[index], ChangeRecord::new(csn, payload))?;
        state.update(&csn);
        written += 1;

        if written % 64 == 0 {
            tokio::task::yield_now().await;
        }
    }

    debug!(replica_id, written, "replica finished writing");
    Ok(written)
}

/// Progress of one pass over the external changelog
struct ReadPass {
    read: usize,
    last: Option<Csn>,
    positions: BTreeMap<DomainId, ServerState>,
}

/// Read up to `limit` changes, checking they come in strictly ascending order
fn read_ordered(
    cursor: &mut EclCursor,
    limit: Option<usize>,
    after: Option<Csn>,
) -> Result<ReadPass, SimulationError> {
    let mut pass = ReadPass {
        read: 0,
        last: after,
        positions: BTreeMap::new(),
    };

    while limit.map_or(true, |limit| pass.read < limit) && cursor.next()? {
        let csn = cursor.current()?.csn;
        if let Some(previous) = pass.last {
            if csn <= previous {
                return Err(SimulationError::OutOfOrder {
                    previous,
                    current: csn,
                });
            }
        }
        if let Some(domain) = cursor.domain() {
            pass.positions
                .entry(domain.clone())
                .or_insert_with(ServerState::new)
                .update(&csn);
        }
        pass.last = Some(csn);
        pass.read += 1;
    }
    Ok(pass)
}

fn open_ecl_cursor(
    changelog: &Arc<Changelog>,
    domains: &[DomainId],
    enabled: EclEnabledDomains,
    options: CursorOptions,
    positions: &BTreeMap<DomainId, ServerState>,
) -> Result<EclCursor, SimulationError> {
    let mut cursor = MultiDomainDBCursor::new(changelog.clone(), options);
    for domain in domains {
        let start = positions.get(domain).cloned().unwrap_or_default();
        cursor.add_domain(domain.clone(), &start)?;
    }
    Ok(EclMultiDomainDBCursor::new(enabled, cursor))
}

/// Run concurrent replicas writing CSN-stamped changes into shared
/// domains, then read everything back through the external changelog in
/// two passes, the second resuming from the positions of the first.
pub async fn run_simulation(config: SimulationConfig) -> Result<SimulationStats, SimulationError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Replication Simulation                              ║");
    println!(
        "║  Replicas: {} | Domains: {} | Changes/Replica: {} ║",
        config.num_replicas, config.num_domains, config.changes_per_replica
    );
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let config = Arc::new(config);
    let domains: Arc<Vec<DomainId>> = Arc::new(
        (0..config.num_domains)
            .map(|i| DomainId::new(format!("dc=domain{},dc=example,dc=com", i)))
            .collect(),
    );
    let changelog = Arc::new(Changelog::new());
    let state_store = Arc::new(MemoryStateStore::new());

    let mut states = Vec::with_capacity(domains.len());
    let mut flushers = Vec::with_capacity(domains.len());
    for domain in domains.iter() {
        let state = Arc::new(PersistentServerState::with_config(
            state_store.clone(),
            domain.clone(),
            CHANGELOG_SERVER_ID,
            ServerState::new(),
            config.persistence.clone(),
        )?);
        flushers.push(spawn_state_flusher(state.clone()));
        states.push(state);
    }
    let states = Arc::new(states);

    println!("\n[{}] [Phase 1/3] Generating changes...", timestamp());

    let mut handles = vec![];
    for replica_id in 1..=config.num_replicas {
        handles.push(tokio::spawn(run_replica(
            replica_id as ReplicaId,
            config.clone(),
            domains.clone(),
            changelog.clone(),
            states.clone(),
        )));
    }

    let mut changes_written = 0;
    for handle in handles {
        changes_written += handle.await??;
    }
    for flusher in flushers {
        flusher.shutdown().await;
    }

    for (domain, state) in domains.iter().zip(states.iter()) {
        let reloaded = PersistentServerState::new(state_store.clone(), domain.clone(), CHANGELOG_SERVER_ID)?;
        if reloaded.state() != state.state() {
            return Err(SimulationError::StateMismatch(domain.clone()));
        }
    }

    println!("[{}] [Phase 1/3] ✓ Completed", timestamp());
    println!("[{}] [Phase 2/3] Reading the external changelog...", timestamp());

    let enabled: EclEnabledDomains = domains
        .iter()
        .take(config.ecl_enabled_domains)
        .cloned()
        .collect();
    let expected: usize = domains
        .iter()
        .take(config.ecl_enabled_domains)
        .map(|domain| changelog.len(domain))
        .sum();

    let mut cursor = open_ecl_cursor(
        &changelog,
        &domains,
        enabled.clone(),
        CursorOptions::default(),
        &BTreeMap::new(),
    )?;
    let first = read_ordered(&mut cursor, Some(expected / 2), None)?;
    cursor.close();

    println!("[{}] [Phase 2/3] ✓ Read {} changes", timestamp(), first.read);
    println!("[{}] [Phase 3/3] Resuming from the last positions...", timestamp());

    let mut cursor = open_ecl_cursor(
        &changelog,
        &domains,
        enabled,
        CursorOptions::resume_after(),
        &first.positions,
    )?;
    let second = read_ordered(&mut cursor, None, first.last)?;
    let domains_dropped = domains.len() - cursor.inner().domains().len();
    cursor.close();

    let changes_read = first.read + second.read;
    if changes_read != expected {
        return Err(SimulationError::MissingChanges {
            expected,
            found: changes_read,
        });
    }

    println!("[{}] [Phase 3/3] ✓ Completed", timestamp());
    info!(changes_written, changes_read, "simulation finished");

    let total_time = start.elapsed();
    Ok(SimulationStats {
        num_replicas: config.num_replicas,
        num_domains: config.num_domains,
        changes_written,
        changes_read,
        resumed_at: first.read,
        domains_dropped,
        total_time,
        changes_per_second: (changes_written + changes_read) as f64 / total_time.as_secs_f64(),
    })
}

/// Repeat the simulation with a growing number of replicas
pub async fn simulation_scaling(max_replicas: usize, step_size: usize) -> Result<(), SimulationError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Changelog Merge vs Replicas        ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut current_replicas = step_size;
    while current_replicas <= max_replicas {
        let stats = run_simulation(SimulationConfig {
            num_replicas: current_replicas,
            changes_per_replica: 50,
            ..SimulationConfig::default()
        })
        .await?;
        stats.print();
        current_replicas += step_size;
    }
    Ok(())
}
