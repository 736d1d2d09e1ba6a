//! SQLite-backed relational store used as the exchange medium between stages.
//!
//! Every pipeline stage opens the store, drops and recreates the tables it
//! owns, and commits its output in one transaction.  Derived projections
//! (`orthos_all`, `blocks_all`, `breaks_all`) are rematerialized by the stage
//! that changed their sources and carry no independent state.

use std::path::Path;

use rusqlite::Connection;

use crate::common::VERSION;

/// DDL for the tables filled by the catalog loader.
const DDL_CATALOG: &str = "
DROP TABLE IF EXISTS orthos_all;
DROP TABLE IF EXISTS orthos;
DROP TABLE IF EXISTS genome_parts;
DROP TABLE IF EXISTS genomes;
DROP TABLE IF EXISTS genes;
CREATE TABLE genes (
    pid TEXT PRIMARY KEY,
    sp TEXT NOT NULL,
    gpart TEXT NOT NULL,
    pnum_all INTEGER NOT NULL,
    pnum_CDS INTEGER NOT NULL,
    pnum_display INTEGER NOT NULL,
    feat TEXT NOT NULL,
    loc_start INTEGER NOT NULL,
    loc_end INTEGER NOT NULL,
    strand INTEGER NOT NULL,
    length INTEGER NOT NULL,
    sequence TEXT,
    product TEXT,
    GC REAL,
    delta_GC REAL,
    paralogs_n INTEGER NOT NULL DEFAULT 0,
    paralogs TEXT
);
CREATE INDEX genes_sp_gpart ON genes (sp, gpart);
CREATE TABLE genomes (
    sp TEXT PRIMARY KEY,
    name TEXT,
    strain TEXT,
    taxonomy TEXT,
    GC REAL,
    max_pnum_display INTEGER
);
CREATE TABLE genome_parts (
    sp TEXT NOT NULL,
    gpart TEXT NOT NULL,
    min_pnum_display INTEGER,
    max_pnum_display INTEGER,
    PRIMARY KEY (sp, gpart)
);
CREATE TABLE orthos (
    oid INTEGER PRIMARY KEY,
    pid1 TEXT NOT NULL,
    pid2 TEXT NOT NULL,
    sp1 TEXT NOT NULL,
    sp2 TEXT NOT NULL,
    o_ident REAL NOT NULL,
    o_alen INTEGER NOT NULL,
    pnum_order1 INTEGER NOT NULL,
    pnum_order2 INTEGER NOT NULL,
    noblock INTEGER NOT NULL DEFAULT 0,
    UNIQUE (pid1, pid2)
);
CREATE INDEX orthos_sp ON orthos (sp1, sp2);
";

/// DDL for the tables filled by the block finder.
const DDL_BLOCKS: &str = "
DROP TABLE IF EXISTS blocks_all;
DROP TABLE IF EXISTS blocks;
DROP TABLE IF EXISTS pairs;
CREATE TABLE pairs (
    pairid INTEGER PRIMARY KEY,
    sp1 TEXT NOT NULL,
    sp2 TEXT NOT NULL,
    oid_start INTEGER NOT NULL,
    oid_end INTEGER NOT NULL,
    direction INTEGER NOT NULL,
    inblocks1 INTEGER NOT NULL,
    inblocks2 INTEGER NOT NULL
);
CREATE TABLE blocks (
    blockid INTEGER PRIMARY KEY,
    sp1 TEXT NOT NULL,
    sp2 TEXT NOT NULL,
    gpart1 TEXT NOT NULL,
    gpart2 TEXT NOT NULL,
    oid_start INTEGER NOT NULL,
    oid_end INTEGER NOT NULL,
    direction INTEGER NOT NULL,
    block_size INTEGER NOT NULL,
    block_order1 INTEGER NOT NULL,
    block_order2 INTEGER NOT NULL
);
CREATE INDEX blocks_bucket ON blocks (sp1, sp2, gpart1, gpart2, direction);
";

/// DDL for the break table; the mirror row of a deleted break goes with it.
const DDL_BREAKS: &str = "
DROP TABLE IF EXISTS breaks_all;
DROP TABLE IF EXISTS breaks_graph;
DROP TABLE IF EXISTS breaks_ranking;
DROP TABLE IF EXISTS breaks_genes;
DROP TABLE IF EXISTS breaks;
CREATE TABLE breaks (
    breakid INTEGER PRIMARY KEY,
    sp1 TEXT NOT NULL,
    sp2 TEXT NOT NULL,
    gpart1 TEXT NOT NULL,
    gpart2 TEXT NOT NULL,
    left_block INTEGER NOT NULL,
    right_block INTEGER NOT NULL,
    direction INTEGER NOT NULL,
    break_size1 INTEGER NOT NULL,
    break_size2 INTEGER NOT NULL,
    inblocks1 INTEGER NOT NULL,
    inblocks2 INTEGER NOT NULL,
    left1 TEXT NOT NULL,
    right1 TEXT NOT NULL,
    left2 TEXT NOT NULL,
    right2 TEXT NOT NULL,
    opposite INTEGER REFERENCES breaks (breakid) ON DELETE CASCADE,
    break_sum TEXT NOT NULL
);
CREATE INDEX breaks_sp ON breaks (sp1, sp2);
CREATE INDEX breaks_sum ON breaks (break_sum);
";

/// DDL for the break-gene contents.
const DDL_BREAK_GENES: &str = "
DROP TABLE IF EXISTS breaks_genes;
CREATE TABLE breaks_genes (
    breakid INTEGER NOT NULL REFERENCES breaks (breakid) ON DELETE CASCADE,
    pid TEXT NOT NULL,
    side INTEGER NOT NULL,
    ortho TEXT,
    ortho_in INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (breakid, pid)
);
CREATE INDEX breaks_genes_breakid ON breaks_genes (breakid);
";

/// DDL for the per-break ranking row; stale graph results go with it.
const DDL_RANKING: &str = "
DROP TABLE IF EXISTS breaks_graph;
DROP TABLE IF EXISTS breaks_ranking;
CREATE TABLE breaks_ranking (
    breakid INTEGER PRIMARY KEY REFERENCES breaks (breakid) ON DELETE CASCADE,
    real_size1 INTEGER NOT NULL,
    real_size2 INTEGER NOT NULL,
    tRNA_both INTEGER NOT NULL,
    tRNA_both_ext INTEGER NOT NULL,
    content1 TEXT NOT NULL,
    content2 TEXT NOT NULL,
    paralogs1 INTEGER NOT NULL,
    paralogs2 INTEGER NOT NULL,
    delta_GC1 REAL NOT NULL,
    delta_GC2 REAL NOT NULL,
    cycle INTEGER,
    graphid INTEGER
);
";

/// DDL for the break-graph edges.
const DDL_GRAPH: &str = "
DROP TABLE IF EXISTS breaks_graph;
CREATE TABLE breaks_graph (
    graphid INTEGER NOT NULL,
    from_name TEXT NOT NULL,
    to_name TEXT NOT NULL
);
CREATE INDEX breaks_graph_graphid ON breaks_graph (graphid);
";

/// Wrapper around the store connection.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("could not open store {:?}: {}", path.as_ref(), e)
        })?;
        Self::with_connection(conn)
    }

    /// Open a store kept in memory, for tests.
    pub fn open_in_memory() -> Result<Self, anyhow::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, anyhow::Error> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS info (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Access the underlying connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access, for transactions.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Record the tool version and the parameters of a stage run in `info`.
    pub fn record_stage(
        &self,
        stage: &str,
        params: &[(&str, String)],
    ) -> Result<(), anyhow::Error> {
        let mut stmt = self
            .conn
            .prepare("INSERT OR REPLACE INTO info (key, value) VALUES (?1, ?2)")?;
        stmt.execute(rusqlite::params!["version", VERSION])?;
        for (key, value) in params {
            stmt.execute(rusqlite::params![format!("{}.{}", stage, key), value])?;
        }
        Ok(())
    }

    /// Drop and recreate the tables owned by the catalog loader.
    pub fn create_catalog_tables(&self) -> Result<(), anyhow::Error> {
        Ok(self.conn.execute_batch(DDL_CATALOG)?)
    }

    /// Drop and recreate the tables owned by the block finder.
    pub fn create_block_tables(&self) -> Result<(), anyhow::Error> {
        Ok(self.conn.execute_batch(DDL_BLOCKS)?)
    }

    /// Drop and recreate the tables owned by the break finder.
    pub fn create_break_tables(&self) -> Result<(), anyhow::Error> {
        Ok(self.conn.execute_batch(DDL_BREAKS)?)
    }

    /// Drop and recreate the break-gene table.
    pub fn create_break_gene_table(&self) -> Result<(), anyhow::Error> {
        Ok(self.conn.execute_batch(DDL_BREAK_GENES)?)
    }

    /// Drop and recreate the ranking table.
    pub fn create_ranking_table(&self) -> Result<(), anyhow::Error> {
        Ok(self.conn.execute_batch(DDL_RANKING)?)
    }

    /// Drop and recreate the break-graph table.
    pub fn create_graph_table(&self) -> Result<(), anyhow::Error> {
        Ok(self.conn.execute_batch(DDL_GRAPH)?)
    }

    /// Rematerialize the `orthos_all` projection from `orthos` and `genes`.
    pub fn materialize_orthos_all(&self) -> Result<(), anyhow::Error> {
        self.conn.execute_batch(
            "
            DROP TABLE IF EXISTS orthos_all;
            CREATE TABLE orthos_all AS
            SELECT o.oid, o.pid1, o.pid2, o.sp1, o.sp2, o.o_ident, o.o_alen,
                   o.pnum_order1, o.pnum_order2, o.noblock,
                   g1.gpart AS gpart1, g1.pnum_CDS AS pnum_CDS1,
                   g1.pnum_all AS pnum_all1, g1.pnum_display AS pnum_display1,
                   g1.loc_start AS loc_start1, g1.loc_end AS loc_end1,
                   g1.strand AS strand1,
                   g2.gpart AS gpart2, g2.pnum_CDS AS pnum_CDS2,
                   g2.pnum_all AS pnum_all2, g2.pnum_display AS pnum_display2,
                   g2.loc_start AS loc_start2, g2.loc_end AS loc_end2,
                   g2.strand AS strand2
            FROM orthos o
            JOIN genes g1 ON g1.pid = o.pid1
            JOIN genes g2 ON g2.pid = o.pid2;
            CREATE INDEX orthos_all_sp ON orthos_all (sp1, sp2);
            ",
        )?;
        Ok(())
    }

    /// Rematerialize the `blocks_all` projection from `blocks` and `orthos_all`.
    pub fn materialize_blocks_all(&self) -> Result<(), anyhow::Error> {
        self.conn.execute_batch(
            "
            DROP TABLE IF EXISTS blocks_all;
            CREATE TABLE blocks_all AS
            SELECT b.blockid, b.sp1, b.sp2, b.gpart1, b.gpart2, b.direction,
                   b.block_size, b.block_order1, b.block_order2,
                   b.oid_start, b.oid_end,
                   os.pid1 AS pid_start1, os.pid2 AS pid_start2,
                   oe.pid1 AS pid_end1, oe.pid2 AS pid_end2,
                   os.pnum_CDS1 AS pnum_CDS_start1, oe.pnum_CDS1 AS pnum_CDS_end1,
                   os.pnum_CDS2 AS pnum_CDS_start2, oe.pnum_CDS2 AS pnum_CDS_end2,
                   os.pnum_display1 AS pnum_display_start1,
                   oe.pnum_display1 AS pnum_display_end1,
                   os.pnum_display2 AS pnum_display_start2,
                   oe.pnum_display2 AS pnum_display_end2
            FROM blocks b
            JOIN orthos_all os ON os.oid = b.oid_start
            JOIN orthos_all oe ON oe.oid = b.oid_end;
            CREATE INDEX blocks_all_bucket
                ON blocks_all (sp1, sp2, gpart1, gpart2, direction);
            ",
        )?;
        Ok(())
    }

    /// Rematerialize the `breaks_all` projection from `breaks`, `genes` and
    /// (when present) `breaks_ranking`.
    pub fn materialize_breaks_all(&self) -> Result<(), anyhow::Error> {
        let has_ranking = self.has_table("breaks_ranking")?;
        let ranking_cols = if has_ranking {
            "r.real_size1, r.real_size2, r.tRNA_both, r.tRNA_both_ext,
             r.content1, r.content2, r.paralogs1, r.paralogs2,
             r.delta_GC1, r.delta_GC2, r.cycle, r.graphid"
        } else {
            "NULL AS real_size1, NULL AS real_size2, NULL AS tRNA_both,
             NULL AS tRNA_both_ext, NULL AS content1, NULL AS content2,
             NULL AS paralogs1, NULL AS paralogs2,
             NULL AS delta_GC1, NULL AS delta_GC2, NULL AS cycle, NULL AS graphid"
        };
        let ranking_join = if has_ranking {
            "LEFT JOIN breaks_ranking r ON r.breakid = k.breakid"
        } else {
            ""
        };
        self.conn.execute_batch(&format!(
            "
            DROP TABLE IF EXISTS breaks_all;
            CREATE TABLE breaks_all AS
            SELECT k.breakid, k.sp1, k.sp2, k.gpart1, k.gpart2, k.direction,
                   k.left_block, k.right_block,
                   k.break_size1, k.break_size2, k.inblocks1, k.inblocks2,
                   k.left1, k.right1, k.left2, k.right2,
                   k.opposite, k.break_sum,
                   gl1.pnum_display AS pnum_display_left1,
                   gr1.pnum_display AS pnum_display_right1,
                   gl2.pnum_display AS pnum_display_left2,
                   gr2.pnum_display AS pnum_display_right2,
                   gl1.loc_end AS loc_left1, gr1.loc_start AS loc_right1,
                   gl2.loc_end AS loc_left2, gr2.loc_start AS loc_right2,
                   {ranking_cols}
            FROM breaks k
            JOIN genes gl1 ON gl1.pid = k.left1
            JOIN genes gr1 ON gr1.pid = k.right1
            JOIN genes gl2 ON gl2.pid = k.left2
            JOIN genes gr2 ON gr2.pid = k.right2
            {ranking_join};
            CREATE INDEX breaks_all_sp ON breaks_all (sp1, sp2);
            "
        ))?;
        Ok(())
    }

    /// Whether a table of the given name exists.
    pub fn has_table(&self, name: &str) -> Result<bool, anyhow::Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Load all gene records, sorted by `(sp, gpart, pnum_all)`.
    pub fn load_genes(&self) -> Result<Vec<Gene>, anyhow::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT pid, sp, gpart, pnum_all, pnum_CDS, pnum_display, feat,
                    loc_start, loc_end, strand, length, product, GC, delta_GC,
                    paralogs_n
             FROM genes ORDER BY sp, gpart, pnum_all",
        )?;
        let genes = stmt
            .query_map([], Gene::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(genes)
    }

    /// Load all ortholog pairs, sorted by oid.
    pub fn load_orthos(&self) -> Result<Vec<Ortho>, anyhow::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT oid, pid1, pid2, sp1, sp2, o_ident, o_alen,
                    pnum_order1, pnum_order2
             FROM orthos ORDER BY oid",
        )?;
        let orthos = stmt
            .query_map([], Ortho::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orthos)
    }
}

/// A gene record as stored, without the sequence payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Gene {
    pub pid: String,
    pub sp: String,
    pub gpart: String,
    pub pnum_all: i64,
    pub pnum_cds: i64,
    pub pnum_display: i64,
    pub feat: String,
    pub loc_start: i64,
    pub loc_end: i64,
    pub strand: i64,
    pub length: i64,
    pub product: Option<String>,
    pub gc: Option<f64>,
    pub delta_gc: Option<f64>,
    pub paralogs_n: i64,
}

impl Gene {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            pid: row.get(0)?,
            sp: row.get(1)?,
            gpart: row.get(2)?,
            pnum_all: row.get(3)?,
            pnum_cds: row.get(4)?,
            pnum_display: row.get(5)?,
            feat: row.get(6)?,
            loc_start: row.get(7)?,
            loc_end: row.get(8)?,
            strand: row.get(9)?,
            length: row.get(10)?,
            product: row.get(11)?,
            gc: row.get(12)?,
            delta_gc: row.get(13)?,
            paralogs_n: row.get(14)?,
        })
    }
}

/// An ortholog pair as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Ortho {
    pub oid: i64,
    pub pid1: String,
    pub pid2: String,
    pub sp1: String,
    pub sp2: String,
    pub o_ident: f64,
    pub o_alen: i64,
    pub pnum_order1: i64,
    pub pnum_order2: i64,
}

impl Ortho {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            oid: row.get(0)?,
            pid1: row.get(1)?,
            pid2: row.get(2)?,
            sp1: row.get(3)?,
            sp2: row.get(4)?,
            o_ident: row.get(5)?,
            o_alen: row.get(6)?,
            pnum_order1: row.get(7)?,
            pnum_order2: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[test]
    fn stage_tables_recreated_on_rerun() -> Result<(), anyhow::Error> {
        let store = super::Store::open_in_memory()?;
        store.create_catalog_tables()?;
        store.conn().execute(
            "INSERT INTO genes (pid, sp, gpart, pnum_all, pnum_CDS, pnum_display,
                                feat, loc_start, loc_end, strand, length)
             VALUES ('g1', 'spA', 'chr', 1, 1, 1, 'CDS', 1, 300, 1, 300)",
            [],
        )?;
        // Re-entering the stage drops and recreates the table.
        store.create_catalog_tables()?;
        let count: i64 =
            store
                .conn()
                .query_row("SELECT COUNT(*) FROM genes", [], |row| row.get(0))?;
        assert_eq!(0, count);
        Ok(())
    }

    #[test]
    fn record_stage_keeps_version_and_params() -> Result<(), anyhow::Error> {
        let store = super::Store::open_in_memory()?;
        store.record_stage("blocks", &[("tolerance", "2".to_string())])?;
        let value: String = store.conn().query_row(
            "SELECT value FROM info WHERE key = 'blocks.tolerance'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!("2", value);
        Ok(())
    }
}
