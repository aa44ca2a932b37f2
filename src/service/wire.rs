//! Request and response encoding for the backend's HTTP interface.
//!
//! Requests are comma-separated argument lists:
//! - data: `uuid,startNanos,endNanos,pwe[,token]`
//! - bracket: `uuid1,uuid2,...[,token]`
//!
//! Data responses are a JSON array of
//! `[millis, nanosRemainder, min, mean, max, count]`; bracket responses are
//! `{"Brackets": [[[lMillis,lNanos],[rMillis,rNanos]], ...], "Merged": ...}`
//! in request order. On failure the backend answers with plain text, which
//! surfaces here as [`FetchError::Malformed`].

use super::Bracket;
use crate::error::FetchError;
use crate::types::{DataPoint, Pwe, StreamId, NANOS_PER_MILLI};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct WirePoint(i64, i64, f64, f64, f64, u64);

#[derive(Debug, Deserialize)]
struct BracketResponse {
    #[serde(rename = "Brackets")]
    brackets: Vec<[[i64; 2]; 2]>,
}

pub fn encode_data_request(
    stream: &StreamId,
    start_ns: i64,
    end_ns: i64,
    pwe: Pwe,
    token: Option<&str>,
) -> String {
    let mut body = format!("{},{},{},{}", stream, start_ns, end_ns, pwe);
    if let Some(token) = token {
        body.push(',');
        body.push_str(token);
    }
    body
}

pub fn encode_bracket_request(streams: &[StreamId], token: Option<&str>) -> String {
    let mut parts: Vec<String> = streams.iter().map(|s| s.to_string()).collect();
    if let Some(token) = token {
        parts.push(token.to_string());
    }
    parts.join(",")
}

pub fn parse_data_response(body: &str) -> Result<Vec<DataPoint>, FetchError> {
    let raw: Vec<WirePoint> = serde_json::from_str(body.trim())
        .map_err(|e| FetchError::Malformed(format!("{}: {}", e, preview(body))))?;

    raw.into_iter()
        .map(|WirePoint(millis, nanos, min, mean, max, count)| {
            if !(0..NANOS_PER_MILLI).contains(&nanos) {
                return Err(FetchError::Malformed(format!(
                    "nanosecond remainder {} out of range",
                    nanos
                )));
            }
            Ok(DataPoint {
                time_millis: millis,
                time_nanos: nanos as u32,
                min,
                mean,
                max,
                count,
            })
        })
        .collect()
}

pub fn parse_bracket_response(
    body: &str,
    streams: &[StreamId],
) -> Result<HashMap<StreamId, Bracket>, FetchError> {
    let response: BracketResponse = serde_json::from_str(body.trim())
        .map_err(|e| FetchError::Malformed(format!("{}: {}", e, preview(body))))?;

    if response.brackets.len() != streams.len() {
        return Err(FetchError::Malformed(format!(
            "requested brackets for {} streams, got {}",
            streams.len(),
            response.brackets.len()
        )));
    }

    Ok(streams
        .iter()
        .zip(response.brackets)
        .map(|(stream, [[l_ms, l_ns], [r_ms, r_ns]])| {
            let bracket = Bracket {
                earliest_ns: l_ms * NANOS_PER_MILLI + l_ns,
                latest_ns: r_ms * NANOS_PER_MILLI + r_ns,
            };
            (*stream, bracket)
        })
        .collect())
}

fn preview(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(64)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_encode_data_request() {
        let stream = Uuid::nil();
        assert_eq!(
            encode_data_request(&stream, 100, 200, 12, None),
            "00000000-0000-0000-0000-000000000000,100,200,12"
        );
        assert!(encode_data_request(&stream, 100, 200, 12, Some("tok")).ends_with(",12,tok"));
    }

    #[test]
    fn test_encode_bracket_request_with_token() {
        let a = Uuid::nil();
        let body = encode_bracket_request(&[a, a], Some("tok"));
        assert_eq!(body.split(',').count(), 3);
        assert!(body.ends_with(",tok"));
    }

    #[test]
    fn test_parse_data_response() {
        let body = "[[1000,250,1.0,2.5,4.0,7],[1001,0,-1,0,1,1]]";
        let points = parse_data_response(body).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].time_ns(), 1_000_000_250);
        assert_eq!(points[0].count, 7);
        assert!(points[1].is_raw());
    }

    #[test]
    fn test_parse_empty_data_response() {
        assert!(parse_data_response("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_plain_text_error_is_malformed() {
        assert!(matches!(
            parse_data_response("Timed out"),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_remainder() {
        assert!(parse_data_response("[[1,1000000,0,0,0,1]]").is_err());
    }

    #[test]
    fn test_parse_bracket_response() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let body = r#"{"Brackets": [[[10,5],[20,0]],[[1,0],[2,999999]]], "Merged": [[1,0],[20,0]]}"#;

        let brackets = parse_bracket_response(body, &[a, b]).unwrap();
        assert_eq!(brackets[&a].earliest_ns, 10_000_005);
        assert_eq!(brackets[&a].latest_ms(), 20);
        assert_eq!(brackets[&b].latest_ms(), 2);
    }

    #[test]
    fn test_parse_bracket_count_mismatch() {
        let a = Uuid::new_v4();
        let body = r#"{"Brackets": [], "Merged": [[0,0],[0,0]]}"#;
        assert!(matches!(
            parse_bracket_response(body, &[a]),
            Err(FetchError::Malformed(_))
        ));
    }
}
