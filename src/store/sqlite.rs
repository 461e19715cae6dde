use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::doc::{Package, PackageSummary};
use crate::error::StoreError;
use crate::fetch::project::Project;
use crate::module::version::{self, LATEST};
use crate::module::{Module, Platform};
use crate::store::{ImportGraph, Repository};

/// Schema migrations
/// Each version contains a list of SQL statements to execute
const MIGRATIONS: &[&[&str]] = &[
    // v1: module lookups for subpackage listings and replacement
    &["CREATE INDEX IF NOT EXISTS idx_packages_module ON packages(platform, module_path, version)"],
    // v2: reverse import lookups
    &["CREATE INDEX IF NOT EXISTS idx_imports_imported ON imports(platform, imported)"],
];

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(db_path: &Path) -> Result<Self, StoreError> {
        info!("Initializing store database at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        debug!("Database connection established");

        let store = Self {
            conn: Mutex::new(conn),
        };

        store.create_schema()?;
        info!("Store initialized successfully");

        Ok(store)
    }

    /// Acquire database connection lock with proper error handling
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Get current timestamp in milliseconds since UNIX epoch
    fn current_timestamp_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        debug!("Creating database schema");

        let conn = self.lock_conn()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS modules (
                module_path TEXT PRIMARY KEY,
                series_path TEXT NOT NULL,
                version TEXT NOT NULL,
                latest TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                data TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_modules_updated_at ON modules(updated_at)",
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS packages (
                platform TEXT NOT NULL,
                import_path TEXT NOT NULL,
                version TEXT NOT NULL,
                module_path TEXT NOT NULL,
                name TEXT NOT NULL,
                synopsis TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (platform, import_path, version)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS imports (
                platform TEXT NOT NULL,
                module_path TEXT NOT NULL,
                version TEXT NOT NULL,
                import_path TEXT NOT NULL,
                imported TEXT NOT NULL,
                PRIMARY KEY (platform, import_path, version, imported)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                series_path TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (path TEXT PRIMARY KEY)",
            [],
        )?;

        // Apply migrations
        Self::apply_migrations(&conn)?;

        debug!("Database schema created successfully");
        Ok(())
    }

    /// Apply pending migrations based on user_version pragma
    fn apply_migrations(conn: &Connection) -> Result<(), StoreError> {
        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        for (i, statements) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version > current_version {
                for sql in *statements {
                    conn.execute(sql, [])?;
                }
                debug!("Applied migration v{}", version);
            }
        }

        let target_version = MIGRATIONS.len() as i32;
        if target_version > current_version {
            conn.pragma_update(None, "user_version", target_version)?;
            debug!("Updated schema version to v{}", target_version);
        }

        Ok(())
    }

    fn upsert_module(conn: &Connection, module: &Module, now: i64) -> Result<(), StoreError> {
        let data = serde_json::to_string(module)?;
        conn.execute(
            r#"
            INSERT INTO modules (module_path, series_path, version, latest, updated_at, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(module_path) DO UPDATE SET
                series_path = excluded.series_path,
                version = excluded.version,
                latest = excluded.latest,
                updated_at = excluded.updated_at,
                data = excluded.data
            "#,
            (
                &module.path,
                &module.series_path,
                &module.version,
                &module.latest,
                now,
                data,
            ),
        )?;
        Ok(())
    }

    /// Newest stored version of a package's imports.
    fn imports_of(
        conn: &Connection,
        platform: &str,
        import_path: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut stmt = conn.prepare(
            r#"
            SELECT imported FROM imports
            WHERE platform = ?1 AND import_path = ?2 AND version = (
                SELECT version FROM packages
                WHERE platform = ?1 AND import_path = ?2
                ORDER BY updated_at DESC LIMIT 1
            )
            ORDER BY imported
            "#,
        )?;
        let imports = stmt
            .query_map((platform, import_path), |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(imports)
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

impl Repository for SqliteStore {
    fn get_package(
        &self,
        platform: &Platform,
        import_path: &str,
        version: &str,
    ) -> Result<Option<Package>, StoreError> {
        let platform = platform.to_string();
        let conn = self.lock_conn()?;

        let data: Option<String> = if version == LATEST {
            // The longest owning module wins when a path moved into a nested module.
            conn.query_row(
                r#"
                SELECT p.data FROM packages p
                JOIN modules m ON m.module_path = p.module_path AND m.latest = p.version
                WHERE p.platform = ?1 AND p.import_path = ?2
                ORDER BY length(p.module_path) DESC
                LIMIT 1
                "#,
                (&platform, import_path),
                |row| row.get(0),
            )
            .optional()?
        } else {
            conn.query_row(
                "SELECT data FROM packages WHERE platform = ?1 AND import_path = ?2 AND version = ?3",
                (&platform, import_path, version),
                |row| row.get(0),
            )
            .optional()?
        };

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    fn put_module_packages(
        &self,
        platform: &Platform,
        module: &Module,
        packages: &[Package],
    ) -> Result<(), StoreError> {
        let platform = platform.to_string();
        debug!(
            "Saving {} packages for {}@{} on {}",
            packages.len(),
            module.path,
            module.version,
            platform
        );

        let now = Self::current_timestamp_ms();
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        Self::upsert_module(&tx, module, now)?;

        tx.execute(
            "DELETE FROM packages WHERE platform = ?1 AND module_path = ?2 AND version = ?3",
            (&platform, &module.path, &module.version),
        )?;
        tx.execute(
            "DELETE FROM imports WHERE platform = ?1 AND module_path = ?2 AND version = ?3",
            (&platform, &module.path, &module.version),
        )?;

        {
            let mut package_stmt = tx.prepare(
                r#"
                INSERT INTO packages
                    (platform, import_path, version, module_path, name, synopsis, updated_at, data)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            let mut import_stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO imports (platform, module_path, version, import_path, imported)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;

            for package in packages {
                let data = serde_json::to_string(package)?;
                package_stmt.execute((
                    &platform,
                    &package.import_path,
                    &module.version,
                    &module.path,
                    &package.name,
                    &package.synopsis,
                    now,
                    data,
                ))?;
                for imported in &package.imports {
                    import_stmt.execute((
                        &platform,
                        &module.path,
                        &module.version,
                        &package.import_path,
                        imported,
                    ))?;
                }
            }
        }

        tx.commit()?;

        debug!("Successfully saved {}@{}", module.path, module.version);
        Ok(())
    }

    fn get_module(&self, module_path: &str) -> Result<Option<Module>, StoreError> {
        let conn = self.lock_conn()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT data, updated_at FROM modules WHERE module_path = ?1",
                [module_path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((data, updated_at)) => {
                let mut module: Module = serde_json::from_str(&data)?;
                module.updated = millis_to_datetime(updated_at);
                Ok(Some(module))
            }
            None => Ok(None),
        }
    }

    fn put_module(&self, module: &Module) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        Self::upsert_module(&conn, module, Self::current_timestamp_ms())
    }

    fn has_module_version(
        &self,
        platform: &Platform,
        module_path: &str,
        version: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.lock_conn()?;
        let exists: bool = conn.query_row(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM packages
                WHERE platform = ?1 AND module_path = ?2 AND version = ?3
            )
            "#,
            (platform.to_string(), module_path, version),
            |row| row.get(0),
        )?;

        Ok(exists)
    }

    fn is_blocked(&self, path: &str) -> Result<bool, StoreError> {
        let conn = self.lock_conn()?;
        let blocked: bool = conn.query_row(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM blocks
                WHERE path = ?1 OR substr(?1, 1, length(path) + 1) = path || '/'
            )
            "#,
            [path],
            |row| row.get(0),
        )?;

        Ok(blocked)
    }

    fn block(&self, path: &str) -> Result<(), StoreError> {
        info!("Blocking {}", path);
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        tx.execute("INSERT OR IGNORE INTO blocks (path) VALUES (?1)", [path])?;
        let packages = tx.execute(
            r#"
            DELETE FROM packages
            WHERE import_path = ?1 OR substr(import_path, 1, length(?1) + 1) = ?1 || '/'
            "#,
            [path],
        )?;
        tx.execute(
            r#"
            DELETE FROM imports
            WHERE import_path = ?1 OR substr(import_path, 1, length(?1) + 1) = ?1 || '/'
            "#,
            [path],
        )?;
        let modules = tx.execute(
            r#"
            DELETE FROM modules
            WHERE module_path = ?1 OR substr(module_path, 1, length(?1) + 1) = ?1 || '/'
            "#,
            [path],
        )?;

        tx.commit()?;
        debug!("Removed {} modules and {} packages under {}", modules, packages, path);
        Ok(())
    }

    fn touch_module(&self, path: &str) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        let touched = conn.execute(
            r#"
            UPDATE modules SET updated_at = ?2
            WHERE module_path = ?1 OR substr(?1, 1, length(module_path) + 1) = module_path || '/'
            "#,
            (path, Self::current_timestamp_ms()),
        )?;
        debug!("Touched {} module rows for {}", touched, path);
        Ok(())
    }

    fn oldest(&self) -> Result<Option<(String, DateTime<Utc>)>, StoreError> {
        let conn = self.lock_conn()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT module_path, updated_at FROM modules ORDER BY updated_at ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(path, ms)| millis_to_datetime(ms).map(|at| (path, at))))
    }

    fn get_project(&self, series_path: &str) -> Result<Option<Project>, StoreError> {
        let conn = self.lock_conn()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM projects WHERE series_path = ?1",
                [series_path],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    fn put_project(&self, series_path: &str, project: &Project) -> Result<(), StoreError> {
        let data = serde_json::to_string(project)?;
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO projects (series_path, data) VALUES (?1, ?2)
            ON CONFLICT(series_path) DO UPDATE SET data = excluded.data
            "#,
            (series_path, data),
        )?;
        Ok(())
    }

    fn search(
        &self,
        platform: &Platform,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PackageSummary>, StoreError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let pattern = format!(
            "%{}%",
            query
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT import_path, synopsis, version,
                CASE
                    WHEN name = ?2 THEN 3
                    WHEN import_path LIKE ?3 ESCAPE '\' THEN 2
                    ELSE 1
                END AS score
            FROM packages
            WHERE platform = ?1
              AND (name = ?2 OR import_path LIKE ?3 ESCAPE '\' OR synopsis LIKE ?3 ESCAPE '\')
            ORDER BY score DESC, length(import_path), import_path
            "#,
        )?;

        let rows = stmt
            .query_map((platform.to_string(), query, pattern), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        // One result per import path, taken from its highest stored version.
        let mut order: Vec<String> = Vec::new();
        let mut best: HashMap<String, (String, String)> = HashMap::new();
        for (import_path, synopsis, version) in rows {
            match best.get_mut(&import_path) {
                Some(current) => {
                    if version::compare_versions(&version, &current.1).is_gt() {
                        *current = (synopsis, version);
                    }
                }
                None => {
                    order.push(import_path.clone());
                    best.insert(import_path, (synopsis, version));
                }
            }
        }

        Ok(order
            .into_iter()
            .take(limit)
            .filter_map(|import_path| {
                let (synopsis, _) = best.remove(&import_path)?;
                Some(PackageSummary {
                    import_path,
                    synopsis,
                })
            })
            .collect())
    }

    fn subpackages(
        &self,
        platform: &Platform,
        module_path: &str,
        version: &str,
        import_path: &str,
    ) -> Result<Vec<PackageSummary>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT import_path, synopsis FROM packages
            WHERE platform = ?1 AND module_path = ?2 AND version = ?3
              AND substr(import_path, 1, length(?4) + 1) = ?4 || '/'
            ORDER BY import_path
            "#,
        )?;

        let summaries = stmt
            .query_map(
                (platform.to_string(), module_path, version, import_path),
                |row| {
                    Ok(PackageSummary {
                        import_path: row.get(0)?,
                        synopsis: row.get(1)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(summaries)
    }

    fn packages(
        &self,
        platform: &Platform,
        import_paths: &[String],
    ) -> Result<Vec<PackageSummary>, StoreError> {
        if import_paths.is_empty() {
            return Ok(Vec::new());
        }

        let platform = platform.to_string();
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT synopsis FROM packages
            WHERE platform = ?1 AND import_path = ?2
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )?;

        let mut summaries = Vec::new();
        for import_path in import_paths {
            let synopsis: Option<String> = stmt
                .query_row((&platform, import_path), |row| row.get(0))
                .optional()?;
            if let Some(synopsis) = synopsis {
                summaries.push(PackageSummary {
                    import_path: import_path.clone(),
                    synopsis,
                });
            }
        }

        Ok(summaries)
    }

    fn import_graph(
        &self,
        platform: &Platform,
        import_path: &str,
        depth: usize,
    ) -> Result<ImportGraph, StoreError> {
        let platform = platform.to_string();
        let conn = self.lock_conn()?;

        let mut graph = ImportGraph::default();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut expanded: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

        graph.nodes.push(import_path.to_string());
        index.insert(import_path.to_string(), 0);
        queue.push_back((0, 0));

        while let Some((node, level)) = queue.pop_front() {
            if level >= depth || !expanded.insert(node) {
                continue;
            }
            let imports = Self::imports_of(&conn, &platform, &graph.nodes[node])?;
            for imported in imports {
                let target = match index.get(&imported) {
                    Some(&i) => i,
                    None => {
                        let i = graph.nodes.len();
                        graph.nodes.push(imported.clone());
                        index.insert(imported, i);
                        queue.push_back((i, level + 1));
                        i
                    }
                };
                graph.edges.push((node, target));
            }
        }

        Ok(graph)
    }
}
