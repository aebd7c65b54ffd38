//! SQLite storage implementation

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params};

use super::{Datastore, Db, EntityFacts, TxReport, tables};
use crate::schema::{self, AttributeShape, meta};
use crate::value::{AttributeMap, Cardinality, TxOp, Value, ValueType};
use crate::{Error, Result};

/// Datoms visible at a basis, in write order
const SELECT_DATOMS: &str =
    "SELECT e, a, v, added FROM datoms WHERE tx <= ?1 ORDER BY id";

/// Datoms of attribute-definition entities
const SELECT_SCHEMA_DATOMS: &str =
    "SELECT e, a, v, added FROM datoms WHERE tx <= ?1 AND a LIKE 'db/%' ORDER BY id";

/// Entity currently holding a value for an attribute
const SELECT_CURRENT_ENTITY: &str = r#"
SELECT e FROM datoms
WHERE a = ?1 AND v = ?2
GROUP BY e
HAVING SUM(CASE WHEN added = 1 THEN 1 ELSE -1 END) > 0
LIMIT 1
"#;

/// Every entity currently holding a value for an attribute
const SELECT_CURRENT_HOLDERS: &str = r#"
SELECT e FROM datoms
WHERE a = ?1 AND v = ?2
GROUP BY e
HAVING SUM(CASE WHEN added = 1 THEN 1 ELSE -1 END) > 0
ORDER BY e
"#;

/// Append a retraction for every current datom of an entity
const RETRACT_ENTITY: &str = r#"
INSERT INTO datoms (e, a, v, tx, added)
SELECT e, a, v, ?2, 0 FROM datoms
WHERE e = ?1
GROUP BY a, v
HAVING SUM(CASE WHEN added = 1 THEN 1 ELSE -1 END) > 0
"#;

const INSERT_DATOM: &str =
    "INSERT INTO datoms (e, a, v, tx, added) VALUES (?1, ?2, ?3, ?4, 1)";

type RawFacts = Vec<(String, SqlValue)>;

/// SQLite-backed datom store.
///
/// The connection sits behind a mutex: every `transact` and `db` call holds
/// it for its whole duration, so a snapshot never observes a transaction
/// half-applied.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_tables()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_tables()?;
        Ok(store)
    }

    fn initialize_tables(&self) -> Result<()> {
        let conn = self.lock()?;
        for stmt in tables::all_table_statements() {
            conn.execute(stmt, [])?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(StoreStats {
            transactions: count("SELECT COUNT(*) FROM transactions")?,
            assertions: count("SELECT COUNT(*) FROM datoms WHERE added = 1")?,
            retractions: count("SELECT COUNT(*) FROM datoms WHERE added = 0")?,
        })
    }
}

impl Datastore for SqliteStore {
    fn transact(&self, ops: &[TxOp]) -> Result<TxReport> {
        let mut conn = self.lock()?;
        if ops.is_empty() {
            return Ok(TxReport {
                tx: current_basis(&conn)?,
                ..Default::default()
            });
        }

        // Dropping `tx` on any error rolls the whole call back.
        let tx = conn.transaction()?;
        let mut shapes = installed_shapes(&tx)?;

        tx.execute(
            "INSERT INTO transactions (committed_at) VALUES (?1)",
            params![Utc::now().to_rfc3339()],
        )?;
        let tx_id = tx.last_insert_rowid();
        let mut next_e: i64 =
            tx.query_row("SELECT COALESCE(MAX(e), 0) + 1 FROM datoms", [], |row| row.get(0))?;

        let mut claimed = HashSet::new();
        let mut report = TxReport {
            tx: tx_id,
            ..Default::default()
        };

        for op in ops {
            match op {
                TxOp::Assert(facts) => {
                    validate_assertion(&tx, facts, &shapes, &mut claimed)?;
                    for (a, v) in facts.iter() {
                        tx.prepare_cached(INSERT_DATOM)?
                            .execute(params![next_e, a, to_sql(v), tx_id])?;
                    }
                    report.datoms_asserted += facts.len();

                    // attributes become usable by later ops of the same call
                    if facts.contains(meta::IDENT) {
                        let (ident, shape) = AttributeShape::from_facts(facts)?;
                        shapes.insert(ident, shape);
                    }
                    next_e += 1;
                }
                TxOp::RetractEntity { attribute, value } => {
                    let mut retracted = 0;
                    if let Some(e) = find_current_entity(&tx, attribute, value)? {
                        tx.execute(RETRACT_ENTITY, params![e, tx_id])?;
                        retracted = 1;
                    }
                    report.entities_retracted += retracted;
                    report.retracted_per_op.push(retracted);
                }
                TxOp::RetractReferencing { attribute, value } => {
                    let holders = find_current_holders(&tx, attribute, value)?;
                    for e in &holders {
                        tx.execute(RETRACT_ENTITY, params![e, tx_id])?;
                    }
                    report.entities_retracted += holders.len();
                    report.retracted_per_op.push(holders.len());
                }
            }
        }

        // a call that changed nothing leaves no transaction behind
        if report.datoms_asserted == 0 && report.entities_retracted == 0 {
            drop(tx);
            report.tx = current_basis(&conn)?;
            return Ok(report);
        }

        tx.commit()?;
        tracing::debug!(
            "tx {}: {} datoms asserted, {} entities retracted",
            tx_id,
            report.datoms_asserted,
            report.entities_retracted
        );
        Ok(report)
    }

    fn db(&self) -> Result<Db> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let basis = current_basis(&tx)?;
        let raw = read_facts(&tx, SELECT_DATOMS, basis)?;
        let shapes = shapes_from(&raw)?;

        let entities = raw
            .into_iter()
            .map(|(e, facts)| {
                Ok(EntityFacts {
                    e,
                    facts: decode_facts(facts, &shapes)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Db::new(basis, entities))
    }
}

fn current_basis(conn: &Connection) -> Result<i64> {
    let basis: i64 =
        conn.query_row("SELECT COALESCE(MAX(tx), 0) FROM transactions", [], |row| row.get(0))?;
    Ok(basis)
}

/// Read datoms and fold retractions into the current facts per entity
fn read_facts(conn: &Connection, sql: &str, basis: i64) -> Result<BTreeMap<i64, RawFacts>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![basis], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, SqlValue>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut entities: BTreeMap<i64, RawFacts> = BTreeMap::new();
    for (e, a, v, added) in rows {
        let facts = entities.entry(e).or_default();
        if added {
            facts.push((a, v));
        } else if let Some(pos) = facts.iter().position(|(fa, fv)| *fa == a && *fv == v) {
            facts.remove(pos);
        }
    }
    entities.retain(|_, facts| !facts.is_empty());
    Ok(entities)
}

fn installed_shapes(conn: &Connection) -> Result<HashMap<String, AttributeShape>> {
    let raw = read_facts(conn, SELECT_SCHEMA_DATOMS, i64::MAX)?;
    shapes_from(&raw)
}

/// Meta attributes plus every attribute defined among `raw`
fn shapes_from(raw: &BTreeMap<i64, RawFacts>) -> Result<HashMap<String, AttributeShape>> {
    let meta_shapes = schema::meta_shapes();
    let mut shapes = meta_shapes.clone();
    for facts in raw.values() {
        if facts.iter().any(|(a, _)| a == meta::IDENT) {
            let decoded = decode_facts(facts.clone(), &meta_shapes)?;
            let (ident, shape) = AttributeShape::from_facts(&decoded)?;
            shapes.insert(ident, shape);
        }
    }
    Ok(shapes)
}

fn decode_facts(raw: RawFacts, shapes: &HashMap<String, AttributeShape>) -> Result<AttributeMap> {
    let mut facts = AttributeMap::new();
    for (a, v) in raw {
        let shape = shapes
            .get(&a)
            .ok_or_else(|| Error::Decode(format!("no schema for stored attribute {}", a)))?;
        let value = from_sql(&a, v, shape.value_type)?;
        facts.push(a, value);
    }
    Ok(facts)
}

fn validate_assertion(
    conn: &Connection,
    facts: &AttributeMap,
    shapes: &HashMap<String, AttributeShape>,
    claimed: &mut HashSet<(String, String)>,
) -> Result<()> {
    let mut seen = HashSet::new();
    let mut identities = Vec::new();

    for (a, v) in facts.iter() {
        let shape = shapes
            .get(a)
            .ok_or_else(|| Error::UnknownAttribute(a.to_string()))?;

        let finite = match v {
            Value::Double(n) => n.is_finite(),
            _ => true,
        };
        if v.value_type() != shape.value_type || !finite {
            return Err(Error::TypeMismatch {
                attribute: a.to_string(),
                expected: shape.value_type,
            });
        }
        if shape.cardinality == Cardinality::One && !seen.insert(a) {
            return Err(Error::CardinalityViolation(a.to_string()));
        }
        if shape.identity {
            identities.push((a, v));
        }
    }

    if identities.is_empty() {
        return Err(Error::MissingIdentity);
    }

    for (a, v) in identities {
        let key = (a.to_string(), v.to_string());
        if claimed.contains(&key) || find_current_entity(conn, a, v)?.is_some() {
            return Err(Error::IdentityConflict {
                attribute: key.0,
                value: key.1,
            });
        }
        claimed.insert(key);
    }
    Ok(())
}

fn find_current_entity(conn: &Connection, attribute: &str, value: &Value) -> Result<Option<i64>> {
    conn.query_row(SELECT_CURRENT_ENTITY, params![attribute, to_sql(value)], |row| {
        row.get(0)
    })
    .optional()
    .map_err(Into::into)
}

fn find_current_holders(conn: &Connection, attribute: &str, value: &Value) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached(SELECT_CURRENT_HOLDERS)?;
    let holders = stmt
        .query_map(params![attribute, to_sql(value)], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(holders)
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::String(s) | Value::Keyword(s) | Value::Ref(s) => SqlValue::Text(s.clone()),
        Value::Long(n) => SqlValue::Integer(*n),
        Value::Double(n) => SqlValue::Real(*n),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Instant(t) => SqlValue::Text(t.to_rfc3339()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_sql(attribute: &str, raw: SqlValue, value_type: ValueType) -> Result<Value> {
    match (value_type, raw) {
        (ValueType::String, SqlValue::Text(s)) => Ok(Value::String(s)),
        (ValueType::Keyword, SqlValue::Text(s)) => Ok(Value::Keyword(s)),
        (ValueType::Ref, SqlValue::Text(s)) => Ok(Value::Ref(s)),
        (ValueType::Long, SqlValue::Integer(n)) => Ok(Value::Long(n)),
        (ValueType::Double, SqlValue::Real(n)) => Ok(Value::Double(n)),
        (ValueType::Double, SqlValue::Integer(n)) => Ok(Value::Double(n as f64)),
        (ValueType::Boolean, SqlValue::Integer(n)) => Ok(Value::Boolean(n != 0)),
        (ValueType::Instant, SqlValue::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Value::Instant(t.with_timezone(&Utc)))
            .map_err(|e| Error::Decode(format!("{}: invalid instant {}: {}", attribute, s, e))),
        (ValueType::Bytes, SqlValue::Blob(b)) => Ok(Value::Bytes(b)),
        (expected, other) => Err(Error::Decode(format!(
            "{}: expected {}, found SQL {}",
            attribute,
            expected,
            other.data_type()
        ))),
    }
}

/// Store statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub transactions: usize,
    pub assertions: usize,
    pub retractions: usize,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Store Statistics:")?;
        writeln!(f, "  Transactions: {}", self.transactions)?;
        writeln!(f, "  Assertions: {}", self.assertions)?;
        writeln!(f, "  Retractions: {}", self.retractions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::attr;

    fn installed_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        schema::install(&store).unwrap();
        store
    }

    fn repository_facts(id: &str) -> AttributeMap {
        AttributeMap::new()
            .with(attr::REPOSITORY_ID, id)
            .with(attr::REPOSITORY_NAME, "demo")
            .with(attr::REPOSITORY_LANGUAGES, Value::keyword("python"))
            .with(attr::REPOSITORY_LANGUAGES, Value::keyword("rust"))
    }

    fn find<'a>(db: &'a Db, attribute: &str, value: &str) -> Option<&'a EntityFacts> {
        db.entities()
            .iter()
            .find(|entity| entity.facts.get_str(attribute) == Some(value))
    }

    #[test]
    fn test_assert_and_read_back() {
        let store = installed_store();
        store
            .transact(&[TxOp::Assert(repository_facts("r1"))])
            .unwrap();

        let db = store.db().unwrap();
        let repo = find(&db, attr::REPOSITORY_ID, "r1").unwrap();
        assert_eq!(repo.facts.get_str(attr::REPOSITORY_NAME), Some("demo"));
        assert_eq!(repo.facts.get_all(attr::REPOSITORY_LANGUAGES).count(), 2);
    }

    #[test]
    fn test_unknown_attribute_before_install() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.transact(&[TxOp::Assert(repository_facts("r1"))]);
        assert!(matches!(result, Err(Error::UnknownAttribute(_))));
    }

    #[test]
    fn test_type_mismatch() {
        let store = installed_store();
        let facts = AttributeMap::new()
            .with(attr::ENTITY_ID, "e1")
            .with(attr::FUNCTION_COMPLEXITY, "high");
        let result = store.transact(&[TxOp::Assert(facts)]);
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_cardinality_one_violation() {
        let store = installed_store();
        let facts = AttributeMap::new()
            .with(attr::ENTITY_ID, "e1")
            .with(attr::ENTITY_NAME, "a")
            .with(attr::ENTITY_NAME, "b");
        let result = store.transact(&[TxOp::Assert(facts)]);
        assert!(matches!(result, Err(Error::CardinalityViolation(_))));
    }

    #[test]
    fn test_missing_identity() {
        let store = installed_store();
        let facts = AttributeMap::new().with(attr::ENTITY_NAME, "anonymous");
        let result = store.transact(&[TxOp::Assert(facts)]);
        assert!(matches!(result, Err(Error::MissingIdentity)));
    }

    #[test]
    fn test_identity_conflict() {
        let store = installed_store();
        store
            .transact(&[TxOp::Assert(repository_facts("r1"))])
            .unwrap();

        let again = store.transact(&[TxOp::Assert(repository_facts("r1"))]);
        assert!(matches!(again, Err(Error::IdentityConflict { .. })));

        let twice_in_one = store.transact(&[
            TxOp::Assert(repository_facts("r2")),
            TxOp::Assert(repository_facts("r2")),
        ]);
        assert!(matches!(twice_in_one, Err(Error::IdentityConflict { .. })));
    }

    #[test]
    fn test_failed_transact_is_atomic() {
        let store = installed_store();
        let basis = store.db().unwrap().basis_tx();

        let result = store.transact(&[
            TxOp::Assert(repository_facts("r1")),
            TxOp::Assert(AttributeMap::new().with(attr::ENTITY_NAME, "no identity")),
        ]);
        assert!(result.is_err());

        let db = store.db().unwrap();
        assert_eq!(db.basis_tx(), basis);
        assert!(find(&db, attr::REPOSITORY_ID, "r1").is_none());
    }

    #[test]
    fn test_retraction_is_appended() {
        let store = installed_store();
        store
            .transact(&[TxOp::Assert(repository_facts("r1"))])
            .unwrap();

        let report = store
            .transact(&[TxOp::retract(attr::REPOSITORY_ID, "r1")])
            .unwrap();
        assert_eq!(report.entities_retracted, 1);

        let db = store.db().unwrap();
        assert!(find(&db, attr::REPOSITORY_ID, "r1").is_none());

        let stats = store.stats().unwrap();
        assert_eq!(stats.retractions, 4);

        // a retracted identity can be asserted again
        store
            .transact(&[TxOp::Assert(repository_facts("r1"))])
            .unwrap();
        assert!(find(&store.db().unwrap(), attr::REPOSITORY_ID, "r1").is_some());
    }

    #[test]
    fn test_retract_missing_entity_is_noop() {
        let store = installed_store();
        let report = store
            .transact(&[TxOp::retract(attr::ENTITY_ID, "nope")])
            .unwrap();
        assert_eq!(report.entities_retracted, 0);
        assert_eq!(report.retracted_per_op, vec![0]);

        // nothing changed, so no transaction was recorded
        assert_eq!(report.tx, store.db().unwrap().basis_tx());
        assert_eq!(store.stats().unwrap().retractions, 0);
    }

    #[test]
    fn test_retract_referencing_hits_every_holder() {
        let store = installed_store();
        let edge = |id: &str, target: &str| {
            AttributeMap::new()
                .with(attr::RELATIONSHIP_ID, id)
                .with(attr::RELATIONSHIP_SOURCE, Value::reference("a"))
                .with(attr::RELATIONSHIP_TARGET, Value::reference(target))
        };
        store
            .transact(&[
                TxOp::Assert(edge("r1", "b")),
                TxOp::Assert(edge("r2", "b")),
                TxOp::Assert(edge("r3", "c")),
            ])
            .unwrap();

        let report = store
            .transact(&[
                TxOp::retract_referencing(attr::RELATIONSHIP_TARGET, Value::reference("b")),
                TxOp::retract_referencing(attr::RELATIONSHIP_TARGET, Value::reference("zzz")),
            ])
            .unwrap();
        assert_eq!(report.retracted_per_op, vec![2, 0]);
        assert_eq!(report.entities_retracted, 2);

        let db = store.db().unwrap();
        assert!(find(&db, attr::RELATIONSHIP_ID, "r1").is_none());
        assert!(find(&db, attr::RELATIONSHIP_ID, "r2").is_none());
        assert!(find(&db, attr::RELATIONSHIP_ID, "r3").is_some());
    }

    #[test]
    fn test_typed_values_roundtrip() {
        let store = installed_store();
        let now = Utc::now();
        let facts = AttributeMap::new()
            .with(attr::ENTITY_ID, "e1")
            .with(attr::FUNCTION_ASYNC, true)
            .with(attr::RELATIONSHIP_WEIGHT, 0.25)
            .with(attr::REPOSITORY_INGESTION_DATE, now)
            .with(attr::ENTITY_EMBEDDING_VECTOR, Value::Bytes(vec![1, 2, 3, 4]));
        store.transact(&[TxOp::Assert(facts)]).unwrap();

        let db = store.db().unwrap();
        let entity = find(&db, attr::ENTITY_ID, "e1").unwrap();
        assert_eq!(entity.facts.get_bool(attr::FUNCTION_ASYNC), Some(true));
        assert_eq!(entity.facts.get_double(attr::RELATIONSHIP_WEIGHT), Some(0.25));
        assert_eq!(entity.facts.get_instant(attr::REPOSITORY_INGESTION_DATE), Some(now));
        assert_eq!(entity.facts.get_bytes(attr::ENTITY_EMBEDDING_VECTOR), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn test_basis_advances_per_transaction() {
        let store = installed_store();
        let before = store.db().unwrap().basis_tx();
        let report = store
            .transact(&[TxOp::Assert(repository_facts("r1"))])
            .unwrap();
        assert_eq!(report.tx, before + 1);
        assert_eq!(store.db().unwrap().basis_tx(), report.tx);
    }
}
