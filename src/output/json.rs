// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use serde_json::{Map, Value};

use super::Listing;

pub struct JsonFormatter;

impl JsonFormatter {
    /// Array of objects keyed by lowercased column name
    pub fn format(listing: &Listing) -> String {
        let keys: Vec<String> = listing.columns.iter().map(|c| c.to_lowercase()).collect();
        let rows: Vec<Value> = listing
            .rows
            .iter()
            .map(|row| {
                let object: Map<String, Value> = keys
                    .iter()
                    .zip(row)
                    .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                    .collect();
                Value::Object(object)
            })
            .collect();
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    }
}
