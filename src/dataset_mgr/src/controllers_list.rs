// Translation layer for the controllers-list query: build the search
// backend request and flatten the aggregation buckets it returns.

use chrono::{DateTime, Datelike, Utc};
use dataset_lib::{DatasetError, DatasetResult};
use log::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const RUN_INDEX: &str = ".v6.run-data.";

#[derive(Debug, Clone, PartialEq)]
pub struct ControllersQuery {
    /// Owner whose runs are counted; `None` counts public runs only.
    pub user: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSummary {
    pub key: String,
    pub controller: String,
    pub results: u64,
    pub last_modified_value: f64,
    pub last_modified_string: String,
}

/// Comma separated monthly run index names covering `start..=end`.
pub fn month_range_indices(prefix: &str, start: &DateTime<Utc>, end: &DateTime<Utc>) -> String {
    let mut indices = Vec::new();
    let (mut year, mut month) = (start.year(), start.month());
    while (year, month) <= (end.year(), end.month()) {
        indices.push(format!("{}{}{:04}-{:02}", prefix, RUN_INDEX, year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    indices.join(",")
}

fn user_term(user: &Option<String>) -> Value {
    match user {
        Some(user) => json!({ "authorization.owner": user }),
        None => json!({ "authorization.access": "public" }),
    }
}

/// Terms aggregation on `run.controller`, newest run first, over the
/// monthly indices the date range touches.
pub fn assemble(prefix: &str, query: &ControllersQuery) -> Value {
    let start_arg = query.start.format("%Y-%m").to_string();
    let end_arg = query.end.format("%Y-%m").to_string();
    info!(
        "Discover controllers for user {:?}, prefix {}: ({} - {})",
        query.user, prefix, query.start, query.end
    );

    let uri_fragment = month_range_indices(prefix, &query.start, &query.end);
    json!({
        "path": format!("/{}/_search", uri_fragment),
        "kwargs": {
            "json": {
                "query": {
                    "bool": {
                        "filter": [
                            { "term": user_term(&query.user) },
                            { "range": { "@timestamp": { "gte": start_arg, "lte": end_arg } } }
                        ]
                    }
                },
                "size": 0,
                "aggs": {
                    "controllers": {
                        "terms": {
                            "field": "run.controller",
                            "order": [{ "runs": "desc" }]
                        },
                        "aggs": { "runs": { "max": { "field": "run.start" } } }
                    }
                }
            },
            "params": { "ignore_unavailable": "true" }
        }
    })
}

fn malformed(reason: &str) -> DatasetError {
    DatasetError::Internal(format!("malformed controllers aggregation: {}", reason))
}

pub fn postprocess(response: &Value) -> DatasetResult<Vec<ControllerSummary>> {
    let buckets = response
        .pointer("/aggregations/controllers/buckets")
        .and_then(|b| b.as_array())
        .ok_or_else(|| malformed("no buckets"))?;
    info!("{} controllers found", buckets.len());

    let mut controllers = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let key = bucket["key"]
            .as_str()
            .ok_or_else(|| malformed("bucket without key"))?;
        controllers.push(ControllerSummary {
            key: key.to_string(),
            controller: key.to_string(),
            results: bucket["doc_count"].as_u64().unwrap_or(0),
            last_modified_value: bucket["runs"]["value"].as_f64().unwrap_or(0.0),
            last_modified_string: bucket["runs"]["value_as_string"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(controllers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn query(user: Option<&str>) -> ControllersQuery {
        ControllersQuery {
            user: user.map(|u| u.to_string()),
            start: Utc.with_ymd_and_hms(2020, 11, 5, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2021, 2, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_month_range() {
        let q = query(None);
        assert_eq!(
            month_range_indices("unit-test", &q.start, &q.end),
            "unit-test.v6.run-data.2020-11,unit-test.v6.run-data.2020-12,\
             unit-test.v6.run-data.2021-01,unit-test.v6.run-data.2021-02"
        );
    }

    #[test]
    fn test_assemble() {
        let body = assemble("unit-test", &query(Some("drb")));
        assert!(body["path"]
            .as_str()
            .unwrap()
            .starts_with("/unit-test.v6.run-data.2020-11,"));
        let search = &body["kwargs"]["json"];
        assert_eq!(search["size"], 0);
        assert_eq!(
            search["query"]["bool"]["filter"][0]["term"],
            json!({"authorization.owner": "drb"})
        );
        assert_eq!(
            search["query"]["bool"]["filter"][1]["range"]["@timestamp"],
            json!({"gte": "2020-11", "lte": "2021-02"})
        );
        assert_eq!(
            search["aggs"]["controllers"]["terms"]["field"],
            "run.controller"
        );

        let public = assemble("unit-test", &query(None));
        assert_eq!(
            public["kwargs"]["json"]["query"]["bool"]["filter"][0]["term"],
            json!({"authorization.access": "public"})
        );
    }

    #[test]
    fn test_postprocess() {
        let response = json!({
            "took": 1,
            "aggregations": {
                "controllers": {
                    "buckets": [
                        {
                            "key": "alphaville.example.com",
                            "doc_count": 2,
                            "runs": {
                                "value": 1598473155810.0,
                                "value_as_string": "2020-08-26T20:19:15.810Z"
                            }
                        },
                        {
                            "key": "beta.example.com",
                            "doc_count": 1,
                            "runs": {
                                "value": 1598473155000.0,
                                "value_as_string": "2020-08-26T20:19:15.000Z"
                            }
                        }
                    ]
                }
            }
        });
        let controllers = postprocess(&response).unwrap();
        assert_eq!(controllers.len(), 2);
        assert_eq!(
            controllers[0],
            ControllerSummary {
                key: "alphaville.example.com".to_string(),
                controller: "alphaville.example.com".to_string(),
                results: 2,
                last_modified_value: 1598473155810.0,
                last_modified_string: "2020-08-26T20:19:15.810Z".to_string(),
            }
        );

        let empty = json!({"aggregations": {"controllers": {"buckets": []}}});
        assert!(postprocess(&empty).unwrap().is_empty());
        assert!(postprocess(&json!({"hits": {}})).is_err());
    }
}
