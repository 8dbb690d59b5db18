//! Declarative queries and their compilation into REST parameters.
//!
//! # Design
//! A `Query` records constraints without validating them. Each key holds
//! either a literal (equality), a map of operators, or, under `$or`, a list
//! of sub-queries. Any operator call on a key that currently holds a literal
//! replaces the literal with an operator map, so equality never survives a
//! later range or membership constraint on the same key.
//!
//! Compilation happens in `prepared_query_parameters`: sub-queries are
//! compiled recursively, entities become pointers, and the result is a flat
//! map of `include`, `order`, `where`, `limit` and `skip`.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value as Json};
use tracing::warn;

use crate::entity::{Entity, Kind, OBJECT_ID};
use crate::http::HttpMethod;
use crate::transport::{Transport, STATUS_OK};
use crate::value::Value;

pub const OR_KEY: &str = "$or";
const CLASS_NAME: &str = "className";

/// Operators that can appear in a key's operator map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    NotEqual,
    Regex,
    Options,
    InQuery,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::In => "$in",
            Operator::NotIn => "$nin",
            Operator::Exists => "$exists",
            Operator::GreaterThan => "$gt",
            Operator::GreaterThanOrEqual => "$gte",
            Operator::LessThan => "$lt",
            Operator::LessThanOrEqual => "$lte",
            Operator::NotEqual => "$ne",
            Operator::Regex => "$regex",
            Operator::Options => "$options",
            Operator::InQuery => "$inQuery",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    List(Vec<Value>),
    Query(Box<Query>),
}

impl Operand {
    fn to_json(&self) -> Json {
        match self {
            Operand::Value(value) => normalize(value),
            Operand::List(values) => Json::Array(values.iter().map(normalize).collect()),
            Operand::Query(query) => query.in_query_json(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Equals(Value),
    Operators(BTreeMap<Operator, Operand>),
    Or(Vec<Query>),
}

/// How a result row is keyed in `QueryResults`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultKey {
    Id(String),
    Position(usize),
}

/// Rows returned by `Query::find`, in server order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResults {
    entries: Vec<(ResultKey, Entity)>,
    /// Position of each key in `entries`.
    index: HashMap<ResultKey, usize>,
}

impl QueryResults {
    /// A repeated key replaces the earlier row in place.
    fn insert(&mut self, key: ResultKey, entity: Entity) {
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot].1 = entity,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, entity));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &ResultKey) -> Option<&Entity> {
        self.index.get(key).map(|&slot| &self.entries[slot].1)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Entity> {
        self.get(&ResultKey::Id(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResultKey, &Entity)> {
        self.entries.iter().map(|(k, e)| (k, e))
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResultKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn into_entities(self) -> Vec<Entity> {
        self.entries.into_iter().map(|(_, e)| e).collect()
    }

    fn pop(&mut self) -> Option<Entity> {
        let (key, entity) = self.entries.pop()?;
        self.index.remove(&key);
        Some(entity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    kind: Kind,
    constraints: BTreeMap<String, Constraint>,
    ordering: Vec<String>,
    includes: Vec<String>,
    limit: u64,
    skip: u64,
    count: u64,
    index_key: Option<String>,
}

impl Query {
    pub fn new(kind: impl Into<Kind>) -> Self {
        Self {
            kind: kind.into(),
            constraints: BTreeMap::new(),
            ordering: Vec::new(),
            includes: Vec::new(),
            limit: 0,
            skip: 0,
            count: 0,
            index_key: Some(OBJECT_ID.to_string()),
        }
    }

    /// A query over the first query's kind matching any of `queries`.
    /// `None` for an empty list.
    pub fn with_or_queries(queries: Vec<Query>) -> Option<Query> {
        let kind = queries.first()?.kind.clone();
        let mut query = Query::new(kind);
        query.matches_or_queries(queries);
        Some(query)
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn constraints(&self) -> &BTreeMap<String, Constraint> {
        &self.constraints
    }

    /// Key results by this attribute; `None` keys them by position.
    pub fn set_index_key(&mut self, key: Option<&str>) -> &mut Self {
        self.index_key = key.map(str::to_string);
        self
    }

    // -----------------------------------------------------------------------
    // Constraints
    // -----------------------------------------------------------------------

    pub fn equal_to(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.count = 0;
        self.constraints
            .insert(key.to_string(), Constraint::Equals(value.into()));
        self
    }

    pub fn not_equal_to(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.set_operator(key, Operator::NotEqual, Operand::Value(value.into()))
    }

    pub fn greater_than(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.set_operator(key, Operator::GreaterThan, Operand::Value(value.into()))
    }

    pub fn greater_than_or_equal_to(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.set_operator(key, Operator::GreaterThanOrEqual, Operand::Value(value.into()))
    }

    pub fn less_than(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.set_operator(key, Operator::LessThan, Operand::Value(value.into()))
    }

    pub fn less_than_or_equal_to(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.set_operator(key, Operator::LessThanOrEqual, Operand::Value(value.into()))
    }

    pub fn contained_in<V: Into<Value>>(&mut self, key: &str, values: impl IntoIterator<Item = V>) -> &mut Self {
        let values = values.into_iter().map(Into::into).collect();
        self.set_operator(key, Operator::In, Operand::List(values))
    }

    pub fn not_contained_in<V: Into<Value>>(&mut self, key: &str, values: impl IntoIterator<Item = V>) -> &mut Self {
        let values = values.into_iter().map(Into::into).collect();
        self.set_operator(key, Operator::NotIn, Operand::List(values))
    }

    pub fn exists(&mut self, key: &str) -> &mut Self {
        self.set_operator(key, Operator::Exists, Operand::Value(Value::from(true)))
    }

    pub fn does_not_exist(&mut self, key: &str) -> &mut Self {
        self.set_operator(key, Operator::Exists, Operand::Value(Value::from(false)))
    }

    /// `$regex`, plus `$options` when `modifiers` is non-empty.
    pub fn matches(&mut self, key: &str, regex: &str, modifiers: Option<&str>) -> &mut Self {
        self.set_operator(key, Operator::Regex, Operand::Value(Value::from(regex)));
        if let Some(modifiers) = modifiers.filter(|m| !m.is_empty()) {
            self.set_operator(key, Operator::Options, Operand::Value(Value::from(modifiers)));
        }
        self
    }

    pub fn contains(&mut self, key: &str, substring: &str) -> &mut Self {
        self.set_operator(key, Operator::Regex, Operand::Value(Value::from(substring)))
    }

    pub fn starts_with(&mut self, key: &str, prefix: &str) -> &mut Self {
        self.set_operator(key, Operator::Regex, Operand::Value(Value::from(format!("^{prefix}"))))
    }

    pub fn ends_with(&mut self, key: &str, suffix: &str) -> &mut Self {
        self.set_operator(key, Operator::Regex, Operand::Value(Value::from(format!("{suffix}$"))))
    }

    /// Match rows whose `key` points at an object matched by `query`.
    /// Replaces whatever constraint `key` held.
    pub fn matches_query(&mut self, key: &str, query: Query) -> &mut Self {
        self.count = 0;
        let mut operators = BTreeMap::new();
        operators.insert(Operator::InQuery, Operand::Query(Box::new(query)));
        self.constraints
            .insert(key.to_string(), Constraint::Operators(operators));
        self
    }

    pub fn matches_or_queries(&mut self, queries: Vec<Query>) -> &mut Self {
        self.count = 0;
        self.constraints
            .insert(OR_KEY.to_string(), Constraint::Or(queries));
        self
    }

    fn set_operator(&mut self, key: &str, operator: Operator, operand: Operand) -> &mut Self {
        self.count = 0;
        let constraint = self
            .constraints
            .entry(key.to_string())
            .or_insert_with(|| Constraint::Operators(BTreeMap::new()));
        match constraint {
            Constraint::Operators(operators) => {
                operators.insert(operator, operand);
            }
            other => {
                let mut operators = BTreeMap::new();
                operators.insert(operator, operand);
                *other = Constraint::Operators(operators);
            }
        }
        self
    }

    // -----------------------------------------------------------------------
    // Ordering and paging
    // -----------------------------------------------------------------------

    pub fn ascending(&mut self, key: &str) -> &mut Self {
        self.ordering.push(key.to_string());
        self
    }

    pub fn descending(&mut self, key: &str) -> &mut Self {
        self.ordering.push(format!("-{key}"));
        self
    }

    pub fn include_object(&mut self, key: &str) -> &mut Self {
        self.includes.push(key.to_string());
        self
    }

    /// Zero means no limit.
    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.limit = n;
        self
    }

    pub fn skip(&mut self, n: u64) -> &mut Self {
        self.skip = n;
        self
    }

    // -----------------------------------------------------------------------
    // Compilation
    // -----------------------------------------------------------------------

    /// The flat parameter map sent with a find request.
    pub fn prepared_query_parameters(&self) -> Map<String, Json> {
        let mut params = Map::new();
        if !self.includes.is_empty() {
            params.insert("include".to_string(), Json::from(self.includes.join(",")));
        }
        if !self.ordering.is_empty() {
            params.insert("order".to_string(), Json::from(self.ordering.join(",")));
        }
        if !self.constraints.is_empty() {
            params.insert("where".to_string(), Json::Object(self.format_constraints()));
        }
        if self.limit != 0 {
            params.insert("limit".to_string(), Json::from(self.limit));
        }
        if self.skip != 0 {
            params.insert("skip".to_string(), Json::from(self.skip));
        }
        params
    }

    /// The compiled `where` document, if any constraint is set.
    pub fn where_json(&self) -> Option<Json> {
        self.prepared_query_parameters().remove("where")
    }

    fn format_constraints(&self) -> Map<String, Json> {
        self.constraints
            .iter()
            .map(|(key, constraint)| (key.clone(), format_constraint(constraint)))
            .collect()
    }

    /// `$inQuery` payload: this query's parameters plus its wire class name.
    fn in_query_json(&self) -> Json {
        let mut params = self.prepared_query_parameters();
        params.insert(CLASS_NAME.to_string(), Json::from(self.kind.class_name()));
        Json::Object(params)
    }

    /// Non-empty compiled `where`, as collected into an `$or` list.
    fn or_fragment(&self) -> Option<Json> {
        self.where_json()
            .filter(|w| w.as_object().is_some_and(|m| !m.is_empty()))
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run the query. Non-success statuses yield no rows and a zero count.
    pub fn find(&mut self, transport: &mut impl Transport) -> QueryResults {
        let mut params = self.prepared_query_parameters();
        params.insert("count".to_string(), Json::from(1));
        self.count = 0;

        let found = transport.request(HttpMethod::Get, &self.kind.path(None), Some(&Json::Object(params)));
        let mut results = QueryResults::default();
        if !transport.outcome().is(STATUS_OK) {
            warn!(class = %self.kind.class_name(), status = transport.status_code(), error = ?transport.error(), "find failed");
            return results;
        }
        self.count = transport.outcome().result_count();

        let rows = match found {
            Some(Json::Array(rows)) => rows,
            _ => Vec::new(),
        };
        for row in rows {
            let key = self
                .index_key
                .as_deref()
                .and_then(|index| row.get(index))
                .and_then(index_value)
                .map(ResultKey::Id)
                .unwrap_or(ResultKey::Position(results.len()));
            results.insert(key, Entity::from_json(self.kind.clone(), row));
        }
        results
    }

    /// The last row of a one-row find.
    pub fn first(&mut self, transport: &mut impl Transport) -> Option<Entity> {
        self.limit(1);
        self.find(transport).pop()
    }

    /// Matching row count. A nonzero count from an earlier `find` or `count`
    /// is reused until a constraint changes.
    pub fn count(&mut self, transport: &mut impl Transport) -> u64 {
        if self.count > 0 {
            return self.count;
        }
        let mut params = self.prepared_query_parameters();
        params.insert("count".to_string(), Json::from(1));
        params.insert("limit".to_string(), Json::from(0));

        transport.request(HttpMethod::Get, &self.kind.path(None), Some(&Json::Object(params)));
        if transport.outcome().is(STATUS_OK) {
            self.count = transport.outcome().result_count();
        }
        self.count
    }

    /// Fetch one object by id, ignoring every constraint.
    pub fn get(&self, id: &str, transport: &mut impl Transport) -> Option<Entity> {
        let fetched = transport.request(HttpMethod::Get, &self.kind.path(Some(id)), None);
        if !transport.outcome().is(STATUS_OK) {
            return None;
        }
        fetched.map(|row| Entity::from_json(self.kind.clone(), row))
    }
}

fn format_constraint(constraint: &Constraint) -> Json {
    match constraint {
        Constraint::Or(queries) => Json::Array(queries.iter().filter_map(Query::or_fragment).collect()),
        Constraint::Operators(operators) => {
            if operators.contains_key(&Operator::InQuery) {
                return operators_json(operators.iter());
            }
            let membership = [Operator::In, Operator::NotIn]
                .into_iter()
                .find_map(|op| operators.get(&op).map(|operand| (op, operand)));
            match membership {
                Some((op, Operand::List(values))) => {
                    let normalized = values.iter().map(normalize).collect();
                    let mut map = Map::new();
                    map.insert(op.as_str().to_string(), Json::Array(normalized));
                    Json::Object(map)
                }
                Some((op, operand)) => operators_json(std::iter::once((&op, operand))),
                None => operators_json(operators.iter()),
            }
        }
        Constraint::Equals(value) => normalize(value),
    }
}

fn operators_json<'a>(operators: impl Iterator<Item = (&'a Operator, &'a Operand)>) -> Json {
    Json::Object(
        operators
            .map(|(op, operand)| (op.as_str().to_string(), operand.to_json()))
            .collect(),
    )
}

/// Entities become pointers; everything else is rendered as is.
fn normalize(value: &Value) -> Json {
    match value {
        Value::Entity(entity) => entity.pointer(),
        other => other.to_json(),
    }
}

fn index_value(value: &Json) -> Option<String> {
    match value {
        Json::String(s) if !s.is_empty() => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::ScriptedTransport;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pointer_to(kind: &str, id: &str) -> Entity {
        Entity::from_json(kind, json!({"objectId": id}))
    }

    // -----------------------------------------------------------------------
    // Compilation
    // -----------------------------------------------------------------------

    #[test]
    fn empty_query_has_no_parameters() {
        assert!(Query::new("Post").prepared_query_parameters().is_empty());
    }

    #[test]
    fn operator_overwrites_equality() {
        let mut query = Query::new("Person");
        query.equal_to("age", 30).greater_than("age", 18);
        assert_eq!(query.where_json(), Some(json!({"age": {"$gt": 18}})));
    }

    #[test]
    fn operators_on_one_key_accumulate() {
        let mut query = Query::new("Person");
        query.greater_than("age", 18).less_than_or_equal_to("age", 65).less_than_or_equal_to("age", 60);
        assert_eq!(query.where_json(), Some(json!({"age": {"$gt": 18, "$lte": 60}})));
    }

    #[test]
    fn equality_after_operator_replaces_it() {
        let mut query = Query::new("Person");
        query.greater_than("age", 18).equal_to("age", 30);
        assert_eq!(query.where_json(), Some(json!({"age": 30})));
    }

    #[test]
    fn equality_with_entity_compiles_to_pointer() {
        let mut query = Query::new("Comment");
        query.equal_to("post", pointer_to("Post", "p1"));
        assert_eq!(
            query.where_json(),
            Some(json!({"post": {"__type": "Pointer", "className": "Post", "objectId": "p1"}}))
        );
    }

    #[test]
    fn comparison_with_entity_compiles_to_pointer() {
        let mut post = pointer_to("Post", "p1");
        post.set("title", "hello");
        let mut query = Query::new("Comment");
        query.not_equal_to("post", post.clone()).greater_than("parent", post);
        let pointer = json!({"__type": "Pointer", "className": "Post", "objectId": "p1"});
        assert_eq!(
            query.where_json(),
            Some(json!({"post": {"$ne": pointer.clone()}, "parent": {"$gt": pointer}}))
        );
    }

    #[test]
    fn contained_in_normalizes_entities() {
        let mut query = Query::new("Game");
        query.contained_in("score", [1, 2, 3]);
        assert_eq!(query.where_json(), Some(json!({"score": {"$in": [1, 2, 3]}})));

        let mut query = Query::new("Comment");
        query.contained_in(
            "author",
            vec![Value::from(pointer_to("User", "u1")), Value::from("raw")],
        );
        assert_eq!(
            query.where_json(),
            Some(json!({"author": {"$in": [
                {"__type": "Pointer", "className": "_User", "objectId": "u1"},
                "raw",
            ]}}))
        );
    }

    #[test]
    fn in_takes_precedence_over_not_in() {
        let mut query = Query::new("Game");
        query.not_contained_in("score", [4]).contained_in("score", [1]).greater_than("score", 0);
        assert_eq!(query.where_json(), Some(json!({"score": {"$in": [1]}})));
    }

    #[test]
    fn existence_and_regex_helpers() {
        let mut query = Query::new("Post");
        query
            .exists("title")
            .does_not_exist("deletedAt")
            .starts_with("slug", "intro")
            .ends_with("file", ".rs")
            .contains("body", "serde")
            .matches("tag", "ru.t", Some("i"))
            .not_equal_to("state", "draft");
        assert_eq!(
            query.where_json(),
            Some(json!({
                "title": {"$exists": true},
                "deletedAt": {"$exists": false},
                "slug": {"$regex": "^intro"},
                "file": {"$regex": ".rs$"},
                "body": {"$regex": "serde"},
                "tag": {"$regex": "ru.t", "$options": "i"},
                "state": {"$ne": "draft"},
            }))
        );
    }

    #[test]
    fn matches_without_modifiers_omits_options() {
        let mut query = Query::new("Post");
        query.matches("tag", "x", Some(""));
        assert_eq!(query.where_json(), Some(json!({"tag": {"$regex": "x"}})));
    }

    #[test]
    fn matches_query_compiles_recursively() {
        let mut posts = Query::new("Post");
        posts.equal_to("published", true).limit(5);
        let mut comments = Query::new("Comment");
        comments.matches_query("post", posts);
        assert_eq!(
            comments.where_json(),
            Some(json!({"post": {"$inQuery": {
                "where": {"published": true},
                "limit": 5,
                "className": "Post",
            }}}))
        );
    }

    #[test]
    fn matches_query_on_users_uses_wire_class_name() {
        let mut users = Query::new("User");
        users.equal_to("verified", true);
        let mut posts = Query::new("Post");
        posts.matches_query("author", users);
        let compiled = posts.where_json().unwrap();
        assert_eq!(compiled["author"]["$inQuery"]["className"], "_User");
    }

    #[test]
    fn or_queries_skip_degenerate_members() {
        let mut a = Query::new("Player");
        a.greater_than("wins", 150);
        let mut b = Query::new("Player");
        b.less_than("wins", 5);
        let empty = Query::new("Player");

        let query = Query::with_or_queries(vec![a, empty, b]).unwrap();
        assert_eq!(query.kind(), &Kind::new("Player"));
        assert_eq!(
            query.where_json(),
            Some(json!({"$or": [{"wins": {"$gt": 150}}, {"wins": {"$lt": 5}}]}))
        );
    }

    #[test]
    fn or_with_no_queries_is_none() {
        assert!(Query::with_or_queries(Vec::new()).is_none());
    }

    #[test]
    fn ordering_includes_and_paging() {
        let mut query = Query::new("Post");
        query
            .ascending("score")
            .descending("createdAt")
            .ascending("score")
            .include_object("author")
            .include_object("post")
            .limit(10)
            .skip(20);
        let params = query.prepared_query_parameters();
        assert_eq!(
            Json::Object(params),
            json!({
                "order": "score,-createdAt,score",
                "include": "author,post",
                "limit": 10,
                "skip": 20,
            })
        );
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    #[test]
    fn find_keys_rows_by_object_id() {
        let mut transport = ScriptedTransport::new().respond(
            200,
            json!({"results": [{"objectId": "a", "n": 1}, {"n": 2}, {"objectId": "b", "n": 3}], "count": 7}),
        );
        let mut query = Query::new("Post");
        query.equal_to("kind", "x");
        let results = query.find(&mut transport);

        let request = transport.last();
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.path, "classes/Post");
        assert_eq!(request.payload, Some(json!({"where": {"kind": "x"}, "count": 1})));

        let keys: Vec<_> = results.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![ResultKey::Id("a".into()), ResultKey::Position(1), ResultKey::Id("b".into())]
        );
        assert_eq!(results.get_by_id("b").unwrap().get("n"), Some(&Value::from(3)));
        assert!(!results.get_by_id("a").unwrap().dirty());
        assert_eq!(query.count(&mut transport), 7);
        assert_eq!(transport.requests.len(), 1);
    }

    #[test]
    fn repeated_ids_replace_rows_in_place() {
        let rows: Vec<Json> = (0..500)
            .map(|n| json!({"objectId": format!("id{}", n % 250), "n": n}))
            .collect();
        let mut transport = ScriptedTransport::new().respond(200, json!({"results": rows}));
        let results = Query::new("Post").find(&mut transport);

        assert_eq!(results.len(), 250);
        assert_eq!(results.keys().next(), Some(&ResultKey::Id("id0".into())));
        assert_eq!(results.get_by_id("id0").unwrap().get("n"), Some(&Value::from(250)));
        assert_eq!(results.get_by_id("id249").unwrap().get("n"), Some(&Value::from(499)));
        assert!(results.get_by_id("id250").is_none());
    }

    #[test]
    fn find_without_index_key_uses_positions() {
        let mut transport =
            ScriptedTransport::new().respond(200, json!({"results": [{"objectId": "a"}, {"objectId": "b"}]}));
        let mut query = Query::new("Post");
        query.set_index_key(None);
        let results = query.find(&mut transport);
        assert_eq!(results.get(&ResultKey::Position(1)).unwrap().id(), Some("b"));
    }

    #[test]
    fn find_decodes_users_into_user_kind() {
        let mut transport = ScriptedTransport::new()
            .respond(200, json!({"results": [{"objectId": "u1", "username": "ann"}]}));
        let mut query = Query::new("User");
        let results = query.find(&mut transport);
        assert_eq!(transport.last().path, "users");
        let row = results.get_by_id("u1").unwrap();
        assert_eq!(row.kind(), &Kind::User);
        assert!(crate::user::User::from_entity(row.clone()).is_some());
    }

    #[test]
    fn failed_find_is_empty_with_zero_count() {
        let mut transport =
            ScriptedTransport::new().respond(400, json!({"code": 102, "error": "bad query"}));
        let mut query = Query::new("Post");
        assert!(query.find(&mut transport).is_empty());
        assert_eq!(transport.error(), Some("bad query"));
    }

    #[test]
    fn first_limits_to_one() {
        let mut transport =
            ScriptedTransport::new().respond(200, json!({"results": [{"objectId": "a"}]}));
        let mut query = Query::new("Post");
        let first = query.first(&mut transport).unwrap();
        assert_eq!(first.id(), Some("a"));
        assert_eq!(transport.last().payload.as_ref().unwrap()["limit"], 1);
    }

    #[test]
    fn first_of_nothing_is_none() {
        let mut transport = ScriptedTransport::new().respond(200, json!({"results": []}));
        assert!(Query::new("Post").first(&mut transport).is_none());
    }

    #[test]
    fn count_is_memoized() {
        let mut transport = ScriptedTransport::new().respond(200, json!({"results": [], "count": 42}));
        let mut query = Query::new("Post");
        query.exists("title");
        assert_eq!(query.count(&mut transport), 42);
        assert_eq!(query.count(&mut transport), 42);
        assert_eq!(transport.requests.len(), 1);
        assert_eq!(
            transport.last().payload,
            Some(json!({"where": {"title": {"$exists": true}}, "count": 1, "limit": 0}))
        );
    }

    #[test]
    fn changing_constraints_drops_cached_count() {
        let mut transport = ScriptedTransport::new()
            .respond(200, json!({"results": [], "count": 3}))
            .respond(200, json!({"results": [], "count": 1}));
        let mut query = Query::new("Post");
        assert_eq!(query.count(&mut transport), 3);
        query.equal_to("title", "a");
        assert_eq!(query.count(&mut transport), 1);
        assert_eq!(transport.requests.len(), 2);
    }

    #[test]
    fn get_bypasses_constraints() {
        let mut transport = ScriptedTransport::new().respond(200, json!({"objectId": "p1", "title": "t"}));
        let mut query = Query::new("Post");
        query.equal_to("title", "other");
        let post = query.get("p1", &mut transport).unwrap();
        assert_eq!(transport.last().path, "classes/Post/p1");
        assert!(transport.last().payload.is_none());
        assert_eq!(post.get_str("title"), Some("t"));
    }
}
