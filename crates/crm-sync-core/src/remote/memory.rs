//! In-memory remote boundary for testing.
//!
//! [`InMemoryRemote`] keeps one table per resource, answers procedures from a
//! script, and records every call it receives.
//!
//! ## Limitations
//!
//! - **No procedure semantics**: procedures return scripted responses only
//! - **No transactions**: each call mutates the tables immediately
//! - **No persistence**: state is lost when the value is dropped

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ListPage, ListQuery, RemoteBoundary, RemoteError, RemoteResult, SortOrder};
use crate::keys::CompositeKey;
use crate::model::Identifier;

/// Kind of boundary call, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Create,
    Update,
    Delete,
    List,
    Procedure,
}

/// One call received by the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Create {
        resource: String,
        payload: Value,
    },
    Update {
        resource: String,
        id: Identifier,
        payload: Value,
        previous: Option<Value>,
    },
    Delete {
        resource: String,
        id: Identifier,
        previous: Option<Value>,
    },
    List {
        resource: String,
        query: ListQuery,
    },
    Procedure {
        name: String,
        params: Value,
    },
}

impl RemoteCall {
    #[must_use]
    pub const fn kind(&self) -> CallKind {
        match self {
            Self::Create { .. } => CallKind::Create,
            Self::Update { .. } => CallKind::Update,
            Self::Delete { .. } => CallKind::Delete,
            Self::List { .. } => CallKind::List,
            Self::Procedure { .. } => CallKind::Procedure,
        }
    }

    /// Resource name, or procedure name for procedure calls.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Create { resource, .. }
            | Self::Update { resource, .. }
            | Self::Delete { resource, .. }
            | Self::List { resource, .. } => resource,
            Self::Procedure { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
struct JunctionColumns {
    owner_field: String,
    related_field: String,
}

#[derive(Debug)]
struct PlannedFailure {
    kind: CallKind,
    target: String,
    skip: usize,
    error: RemoteError,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Vec<Value>>,
    next_id: i64,
    calls: Vec<RemoteCall>,
    scripts: HashMap<String, VecDeque<Value>>,
    failures: Vec<PlannedFailure>,
}

impl State {
    /// Log the call and return the planned failure it triggers, if any.
    fn record(&mut self, call: RemoteCall) -> RemoteResult<()> {
        let position = self
            .failures
            .iter()
            .position(|f| f.kind == call.kind() && f.target == call.target());
        self.calls.push(call);

        let Some(index) = position else {
            return Ok(());
        };
        if self.failures[index].skip > 0 {
            self.failures[index].skip -= 1;
            return Ok(());
        }
        Err(self.failures.remove(index).error)
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`RemoteBoundary`].
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
    junctions: HashMap<String, JunctionColumns>,
}

fn poison_err<T>(_: PoisonError<T>) -> RemoteError {
    RemoteError::Failed("lock poisoned".to_string())
}

fn not_found(resource: &str, id: &Identifier) -> RemoteError {
    RemoteError::Failed(format!("record {id} not found in {resource}"))
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `resource` as a junction keyed by `"{owner}-{related}"`.
    #[must_use]
    pub fn with_junction(mut self, resource: &str, owner_field: &str, related_field: &str) -> Self {
        self.junctions.insert(
            resource.to_string(),
            JunctionColumns {
                owner_field: owner_field.to_string(),
                related_field: related_field.to_string(),
            },
        );
        self
    }

    fn lock(&self) -> RemoteResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(poison_err)
    }

    /// Insert rows directly, without logging a call.
    pub fn seed(&self, resource: &str, rows: Vec<Value>) -> RemoteResult<()> {
        let mut state = self.lock()?;
        for row in rows {
            self.insert(&mut state, resource, row)?;
        }
        Ok(())
    }

    /// Current rows of a table.
    pub fn rows(&self, resource: &str) -> RemoteResult<Vec<Value>> {
        Ok(self.lock()?.tables.get(resource).cloned().unwrap_or_default())
    }

    /// Queue a response for procedure `name`. The last queued response repeats.
    pub fn script_procedure(&self, name: &str, response: Value) -> RemoteResult<()> {
        self.lock()?
            .scripts
            .entry(name.to_string())
            .or_default()
            .push_back(response);
        Ok(())
    }

    /// Fail the `nth` (0-based, counted from now) call of `kind` on `target`.
    pub fn fail_on(
        &self,
        kind: CallKind,
        target: &str,
        nth: usize,
        error: RemoteError,
    ) -> RemoteResult<()> {
        self.lock()?.failures.push(PlannedFailure {
            kind,
            target: target.to_string(),
            skip: nth,
            error,
        });
        Ok(())
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> RemoteResult<Vec<RemoteCall>> {
        Ok(self.lock()?.calls.clone())
    }

    /// Number of calls of `kind` received so far.
    pub fn count(&self, kind: CallKind) -> RemoteResult<usize> {
        Ok(self.lock()?.calls.iter().filter(|c| c.kind() == kind).count())
    }

    fn junction_key(&self, resource: &str, row: &Map<String, Value>) -> RemoteResult<Option<CompositeKey>> {
        let Some(columns) = self.junctions.get(resource) else {
            return Ok(None);
        };
        let column = |field: &str| {
            row.get(field).and_then(Value::as_i64).ok_or_else(|| {
                RemoteError::Constraint(format!(
                    "null value in column \"{field}\" of relation \"{resource}\" violates not-null constraint"
                ))
            })
        };
        Ok(Some(CompositeKey::new(
            column(&columns.owner_field)?,
            column(&columns.related_field)?,
        )))
    }

    fn insert(&self, state: &mut State, resource: &str, payload: Value) -> RemoteResult<Value> {
        let Value::Object(mut row) = payload else {
            return Err(RemoteError::Failed(format!(
                "payload for {resource} must be an object"
            )));
        };

        if let Some(key) = self.junction_key(resource, &row)? {
            let id = Value::from(key.encode());
            let duplicate = state
                .tables
                .get(resource)
                .is_some_and(|rows| rows.iter().any(|r| r.get("id") == Some(&id)));
            if duplicate {
                return Err(RemoteError::Constraint(format!(
                    "duplicate key value violates unique constraint \"{resource}_pkey\""
                )));
            }
            row.insert("id".to_string(), id);
        } else if let Some(id) = row.get("id").and_then(Value::as_i64) {
            state.next_id = state.next_id.max(id);
        } else if !row.contains_key("id") {
            let id = state.allocate_id();
            row.insert("id".to_string(), Value::from(id));
        }

        let row = Value::Object(row);
        state
            .tables
            .entry(resource.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    fn row_position(
        &self,
        state: &State,
        resource: &str,
        id: &Identifier,
    ) -> RemoteResult<usize> {
        let wanted = match (self.junctions.contains_key(resource), id) {
            (true, Identifier::Text(text)) => {
                let key = CompositeKey::decode(text)
                    .map_err(|e| RemoteError::Failed(e.to_string()))?;
                Value::from(key.encode())
            }
            _ => id.to_value(),
        };
        state
            .tables
            .get(resource)
            .and_then(|rows| rows.iter().position(|r| r.get("id") == Some(&wanted)))
            .ok_or_else(|| not_found(resource, id))
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => x
                    .as_f64()
                    .partial_cmp(&y.as_f64())
                    .unwrap_or(Ordering::Equal),
            }
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl RemoteBoundary for InMemoryRemote {
    async fn create(&self, resource: &str, payload: Value) -> RemoteResult<Value> {
        let mut state = self.lock()?;
        state.record(RemoteCall::Create {
            resource: resource.to_string(),
            payload: payload.clone(),
        })?;
        self.insert(&mut state, resource, payload)
    }

    async fn update(
        &self,
        resource: &str,
        id: &Identifier,
        payload: Value,
        previous: Option<&Value>,
    ) -> RemoteResult<Value> {
        let mut state = self.lock()?;
        state.record(RemoteCall::Update {
            resource: resource.to_string(),
            id: id.clone(),
            payload: payload.clone(),
            previous: previous.cloned(),
        })?;

        let position = self.row_position(&state, resource, id)?;
        let Value::Object(changes) = payload else {
            return Err(RemoteError::Failed(format!(
                "payload for {resource} must be an object"
            )));
        };
        let row = state
            .tables
            .get_mut(resource)
            .and_then(|rows| rows.get_mut(position))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| not_found(resource, id))?;

        let expected = previous.and_then(|p| p.get("version")).and_then(Value::as_i64);
        let stored = row.get("version").and_then(Value::as_i64);
        if let (Some(expected), Some(stored)) = (expected, stored) {
            if expected != stored {
                return Err(RemoteError::Conflict(format!(
                    "{resource} {id} was modified by someone else (version {stored}, expected {expected})"
                )));
            }
        }

        for (key, value) in changes {
            row.insert(key, value);
        }
        if let Some(stored) = stored {
            row.insert("version".to_string(), Value::from(stored + 1));
        }
        Ok(Value::Object(row.clone()))
    }

    async fn delete(
        &self,
        resource: &str,
        id: &Identifier,
        previous: Option<&Value>,
    ) -> RemoteResult<Value> {
        let mut state = self.lock()?;
        state.record(RemoteCall::Delete {
            resource: resource.to_string(),
            id: id.clone(),
            previous: previous.cloned(),
        })?;

        let position = self.row_position(&state, resource, id)?;
        state
            .tables
            .get_mut(resource)
            .map(|rows| rows.remove(position))
            .ok_or_else(|| not_found(resource, id))
    }

    async fn list(&self, resource: &str, query: &ListQuery) -> RemoteResult<ListPage> {
        let mut state = self.lock()?;
        state.record(RemoteCall::List {
            resource: resource.to_string(),
            query: query.clone(),
        })?;

        let mut matching: Vec<Value> = state
            .tables
            .get(resource)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        query
                            .filter
                            .iter()
                            .all(|(field, value)| row.get(field) == Some(value))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        matching.sort_by(|a, b| {
            let ordering = compare_values(a.get(&query.sort_field), b.get(&query.sort_field));
            match query.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total = matching.len() as u64;
        let per_page = query.per_page.max(1) as usize;
        let skip = (query.page.max(1) as usize - 1) * per_page;
        let data = matching.into_iter().skip(skip).take(per_page).collect();
        Ok(ListPage { data, total })
    }

    async fn call_procedure(&self, name: &str, params: Value) -> RemoteResult<Value> {
        let mut state = self.lock()?;
        state.record(RemoteCall::Procedure {
            name: name.to_string(),
            params,
        })?;

        let Some(script) = state.scripts.get_mut(name) else {
            return Ok(Value::Null);
        };
        let response = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(response.unwrap_or(Value::Null))
    }
}
