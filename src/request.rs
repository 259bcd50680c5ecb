// SPDX-License-Identifier: MIT

//! The `{query, variables}` request shape sent as the `start` payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A GraphQL request: the query text plus its variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
	pub query: String,
	#[serde(default)]
	pub variables: Map<String, Value>,
}

impl Request {
	pub fn new(query: impl Into<String>) -> Self {
		Self {
			query: query.into(),
			variables: Map::new(),
		}
	}

	/// Set a single variable.
	pub fn var(&mut self, key: impl Into<String>, value: impl Into<Value>) {
		self.variables.insert(key.into(), value.into());
	}

	/// Set multiple variables at once.
	pub fn vars(&mut self, vars: Map<String, Value>) {
		for (key, value) in vars {
			self.variables.insert(key, value);
		}
	}
}

/// Splice variable names into a query template.
///
/// Templates reference names by one-based position using the `%[n]s`
/// notation, so the same name can appear several times without being passed
/// more than once:
///
/// ```
/// use gql_subscription::add_var_names;
///
/// let query = add_var_names("subscription($%[1]s: ID!) { page(id: $%[1]s) { next } }", &["id"]);
/// assert_eq!(query, "subscription($id: ID!) { page(id: $id) { next } }");
/// ```
pub fn add_var_names(query: &str, var_names: &[&str]) -> String {
	let mut out = query.to_string();
	for (i, name) in var_names.iter().enumerate() {
		out = out.replace(&format!("%[{}]s", i + 1), name);
	}
	out
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_request_serializes_empty_variables() {
		let request = Request::new("subscription { x }");
		let json = serde_json::to_value(&request).unwrap();
		assert_eq!(json, json!({"query": "subscription { x }", "variables": {}}));
	}

	#[test]
	fn test_var_and_vars_accumulate() {
		let mut request = Request::new("subscription { x }");
		request.var("first", 1);

		let mut more = Map::new();
		more.insert("second".to_string(), json!("two"));
		request.vars(more);

		assert_eq!(request.variables["first"], json!(1));
		assert_eq!(request.variables["second"], json!("two"));
	}

	#[test]
	fn test_add_var_names_by_position() {
		let query = add_var_names("query($%[1]s: String, $%[2]s: Int) { f(a: $%[1]s) }", &["name", "count"]);
		assert_eq!(query, "query($name: String, $count: Int) { f(a: $name) }");
	}
}
