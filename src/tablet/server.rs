//! Tablet server
//!
//! Owns every table on this node (one tablet per table), the registry of
//! open scanners, and the maintenance loop. Both the in-process client
//! transport and the TCP server call into it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::maintenance::MaintenanceManager;
use crate::mutation::RowOperation;
use crate::schema::{Schema, Value};
use crate::TabletError;

use super::scanner::TabletScanner;
use super::tablet::{Tablet, WriteOutcome};

/// Rows returned by a scan request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanBatch {
    pub scanner_id: u64,
    pub rows: Vec<Vec<Value>>,
    /// False once the scanner is exhausted; it is then closed server-side
    pub has_more: bool,
}

struct OpenScanner {
    table: String,
    scanner: TabletScanner,
    last_access: Instant,
}

pub struct TabletServer {
    config: Config,
    tables: RwLock<HashMap<String, Arc<Tablet>>>,
    /// Serializes table creation
    catalog_lock: Mutex<()>,
    scanners: Mutex<HashMap<u64, OpenScanner>>,
    next_scanner_id: AtomicU64,
    maintenance: MaintenanceManager,
}

impl TabletServer {
    const TABLES_DIR: &'static str = "tables";
    const SCHEMA_FILE: &'static str = "schema";

    /// Open the server rooted at `config.data_dir`, opening every table
    /// found on disk
    pub fn open(config: Config) -> Result<Self> {
        let tables_dir = config.data_dir.join(Self::TABLES_DIR);
        fs::create_dir_all(&tables_dir)?;

        let maintenance = MaintenanceManager::new(config.clone());
        let mut tables = HashMap::new();

        let mut dirs: Vec<PathBuf> = fs::read_dir(&tables_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.join(Self::SCHEMA_FILE).is_file())
            .collect();
        dirs.sort();

        for dir in dirs {
            let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let schema = Arc::new(load_schema(&dir.join(Self::SCHEMA_FILE))?);
            let tablet = Arc::new(Tablet::open(&dir, &name, schema, config.clone())?);
            maintenance.register_tablet(&tablet);
            tables.insert(name, tablet);
        }

        info!(data_dir = %config.data_dir.display(), tables = tables.len(), "tablet server opened");

        Ok(Self {
            config,
            tables: RwLock::new(tables),
            catalog_lock: Mutex::new(()),
            scanners: Mutex::new(HashMap::new()),
            next_scanner_id: AtomicU64::new(1),
            maintenance,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn maintenance(&self) -> &MaintenanceManager {
        &self.maintenance
    }

    /// Start the background maintenance loop
    pub fn start_maintenance(&self) -> Result<()> {
        self.maintenance.start()
    }

    pub fn ping(&self) -> Result<()> {
        Ok(())
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Arc<Schema>> {
        validate_table_name(name)?;
        let _catalog = self.catalog_lock.lock();
        if self.tables.read().contains_key(name) {
            return Err(TabletError::TableExists(name.to_string()));
        }

        let dir = self.table_dir(name);
        fs::create_dir_all(&dir)?;
        store_schema(&dir.join(Self::SCHEMA_FILE), &schema)?;

        let schema = Arc::new(schema);
        let tablet = Arc::new(Tablet::open(&dir, name, Arc::clone(&schema), self.config.clone())?);
        self.maintenance.register_tablet(&tablet);
        self.tables.write().insert(name.to_string(), tablet);

        info!(table = name, columns = schema.num_columns(), "table created");
        Ok(schema)
    }

    /// Schema of an existing table
    pub fn open_table(&self, name: &str) -> Result<Arc<Schema>> {
        Ok(Arc::clone(self.tablet(name)?.schema()))
    }

    pub fn tablet(&self, name: &str) -> Result<Arc<Tablet>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TabletError::TableNotFound(name.to_string()))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn table_dir(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(Self::TABLES_DIR).join(name)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn write(&self, table: &str, ops: &[RowOperation]) -> Result<WriteOutcome> {
        self.tablet(table)?.write_batch(ops)
    }

    // =========================================================================
    // Scans
    // =========================================================================

    /// Open a scanner and return its first batch
    pub fn scan_open(&self, table: &str, batch_rows: Option<usize>) -> Result<ScanBatch> {
        self.expire_scanners();
        let mut scanner = self.tablet(table)?.new_scanner()?;
        let id = self.next_scanner_id.fetch_add(1, Ordering::Relaxed);
        let rows = self.fill_batch(&mut scanner, batch_rows)?;

        let has_more = scanner.has_more();
        if has_more {
            self.scanners.lock().insert(
                id,
                OpenScanner {
                    table: table.to_string(),
                    scanner,
                    last_access: Instant::now(),
                },
            );
        }
        debug!(table, scanner_id = id, rows = rows.len(), has_more, "scanner opened");
        Ok(ScanBatch {
            scanner_id: id,
            rows,
            has_more,
        })
    }

    /// Fetch the next batch of an open scanner
    pub fn scan_next(&self, scanner_id: u64, batch_rows: Option<usize>) -> Result<ScanBatch> {
        self.expire_scanners();
        // Taken out of the registry so other scanners are not blocked
        let mut open = self
            .scanners
            .lock()
            .remove(&scanner_id)
            .ok_or(TabletError::ScannerExpired(scanner_id))?;

        let rows = self.fill_batch(&mut open.scanner, batch_rows)?;
        let has_more = open.scanner.has_more();
        if has_more {
            open.last_access = Instant::now();
            self.scanners.lock().insert(scanner_id, open);
        } else {
            debug!(table = %open.table, scanner_id, rows = open.scanner.rows_returned(), "scanner exhausted");
        }
        Ok(ScanBatch {
            scanner_id,
            rows,
            has_more,
        })
    }

    /// Close a scanner early. Returns false if it was not open.
    pub fn scan_close(&self, scanner_id: u64) -> bool {
        self.scanners.lock().remove(&scanner_id).is_some()
    }

    pub fn open_scanner_count(&self) -> usize {
        self.scanners.lock().len()
    }

    /// Drop scanners idle for longer than the TTL, releasing their pins
    pub fn expire_scanners(&self) -> usize {
        let ttl = self.config.scanner_ttl();
        let now = Instant::now();
        let mut scanners = self.scanners.lock();
        let before = scanners.len();
        scanners.retain(|id, open| {
            let keep = now.duration_since(open.last_access) < ttl;
            if !keep {
                warn!(scanner_id = id, table = %open.table, "scanner expired");
            }
            keep
        });
        before - scanners.len()
    }

    fn fill_batch(&self, scanner: &mut TabletScanner, batch_rows: Option<usize>) -> Result<Vec<Vec<Value>>> {
        let max_rows = batch_rows.unwrap_or(self.config.scan_batch_rows);
        let latency = self.config.scan_batch_max_latency();
        let deadline = (latency > Duration::ZERO).then(|| Instant::now() + latency);
        scanner.next_batch(max_rows, deadline)
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop maintenance, release scanners and sync every WAL
    pub fn shutdown(&self) -> Result<()> {
        self.maintenance.shutdown();
        self.scanners.lock().clear();
        for tablet in self.tables.read().values() {
            tablet.sync_wal()?;
        }
        info!("tablet server shut down");
        Ok(())
    }
}

impl Drop for TabletServer {
    fn drop(&mut self) {
        self.maintenance.shutdown();
    }
}

impl std::fmt::Debug for TabletServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabletServer")
            .field("data_dir", &self.config.data_dir)
            .field("tables", &self.table_names())
            .finish()
    }
}

fn validate_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(TabletError::Config(format!("invalid table name '{}'", name)))
    }
}

fn store_schema(path: &Path, schema: &Schema) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bincode::serialize(schema)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn load_schema(path: &Path) -> Result<Schema> {
    let bytes = fs::read(path)?;
    let mut schema: Schema = bincode::deserialize(&bytes)?;
    schema.rebuild_index()?;
    Ok(schema)
}
