//! Persistence for configuration and per-user ledger snapshots.
//!
//! A mutation commits once the snapshot write returns; activity-log appends
//! are best-effort and never roll back a committed mutation.

use eyre::Context as _;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::Write as _,
    path::PathBuf,
};

use crate::{
    config::SimConfig,
    errors::LedgerError,
    ledger::Ledger,
    market::AssetCatalog,
    paths::AppPaths,
};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment variable overrides to the config.
fn apply_env_overrides(cfg: &mut SimConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("COMETSIM_BINANCE_BASE_URL", |v| {
        v.clone_into(&mut cfg.http.binance_base_url);
    });
    if let Ok(v) = std::env::var("COMETSIM_TICK_SECONDS") {
        if let Ok(n) = v.trim().parse::<u64>() {
            if n > 0 {
                cfg.accrual.tick_seconds = n;
            }
        }
    }
}

impl ConfigStore {
    pub fn new(paths: &AppPaths) -> Self {
        Self {
            path: paths.config_path(),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<SimConfig> {
        if !self.path.exists() {
            let mut cfg = SimConfig::default();
            apply_env_overrides(&mut cfg);
            self.save(&cfg)?;
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: SimConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &SimConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic(&self.path, &s).context("write config.toml")?;
        Ok(())
    }
}

/// The persisted per-user state: the ledger plus the catalog its simulation
/// has evolved. Round-trips losslessly through JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSnapshot {
    pub ledger: Ledger,
    pub catalog: AssetCatalog,
}

#[derive(Debug, Clone)]
pub struct LedgerStore {
    paths: AppPaths,
}

fn valid_user_key(user: &str) -> bool {
    !user.is_empty()
        && user.len() <= 64
        && user
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

impl LedgerStore {
    pub fn new(paths: AppPaths) -> Self {
        Self { paths }
    }

    fn snapshot_path(&self, user: &str) -> eyre::Result<PathBuf> {
        if !valid_user_key(user) {
            eyre::bail!("invalid user key: {user:?} (alphanumeric, '-', '_' only)");
        }
        Ok(self.paths.users_dir().join(format!("{user}.json")))
    }

    pub fn load_user(&self, user: &str) -> eyre::Result<Option<UserSnapshot>> {
        let p = self.snapshot_path(user)?;
        if !p.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        let snap: UserSnapshot =
            serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
        Ok(Some(snap))
    }

    pub fn save_user(&self, user: &str, snap: &UserSnapshot) -> eyre::Result<()> {
        let p = self.snapshot_path(user)?;
        let s = serde_json::to_string_pretty(snap).context("serialize snapshot")?;
        crate::fsutil::write_string_atomic(&p, &s)
            .with_context(|| format!("write {}", p.display()))?;
        Ok(())
    }

    /// All users with a stored snapshot, sorted.
    pub fn list_users(&self) -> eyre::Result<Vec<String>> {
        let dir = self.paths.users_dir();
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut out = vec![];
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry.context("read users dir entry")?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(user) = name.strip_suffix(".json") {
                if valid_user_key(user) {
                    out.push(user.to_owned());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Exclusive lock serializing mutations (and ticks) across processes.
    ///
    /// Fails fast with `StoreBusy` instead of blocking inside a CLI call.
    pub fn acquire_write_lock(&self) -> eyre::Result<File> {
        let p = self.paths.lock_path();
        if let Some(parent) = p.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&p)
            .context("open lock file")?;
        match f.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(LedgerError::StoreBusy.into());
            }
            Err(e) => return Err(eyre::Report::new(e).wrap_err("lock exclusive")),
        }
        Ok(f)
    }

    pub fn release_lock(mut f: File) -> eyre::Result<()> {
        FileExt::unlock(&f).context("unlock")?;
        f.flush().ok();
        Ok(())
    }

    pub fn append_activity(&self, entry: &serde_json::Value) -> eyre::Result<()> {
        let entry = crate::activity::normalize_entry(entry.clone());
        let p = self.paths.activity_log_path();
        if let Some(parent) = p.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&p)
            .context("open activity log")?;
        writeln!(f, "{entry}").context("write activity log")?;
        Ok(())
    }

    /// Most recent activity entries, newest first.
    pub fn read_activity(&self, limit: usize) -> eyre::Result<Vec<serde_json::Value>> {
        let p = self.paths.activity_log_path();
        if !p.exists() {
            return Ok(vec![]);
        }
        let contents = fs::read_to_string(&p).context("read activity log")?;
        let mut out = vec![];
        for line in contents.lines().rev() {
            if out.len() >= limit {
                break;
            }
            let Ok(v) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };
            out.push(v);
        }
        Ok(out)
    }
}
