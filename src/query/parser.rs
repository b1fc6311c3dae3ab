//! Query Parser
//!
//! Parses Logbook query strings into the Query AST.
//!
//! # Supported Syntax
//!
//! ```text
//! FIND collection
//! [WHERE condition [AND condition ...]]
//! [ORDER BY field [ASC|DESC]]
//! [LIMIT n]
//! [OFFSET n]
//!
//! condition := field (= | != | <> | > | >= | < | <=) value
//!            | field BETWEEN value AND value
//! value     := 'text' | "text" | number | true | false | null | now() [- 7d]
//! ```
//!
//! A quote inside a string is written twice: `'O''Brien'`.
//!
//! # Examples
//!
//! ```text
//! FIND voyages WHERE voyage_id = 'V1'
//! FIND checkpoints WHERE voyage_id = 'V1' AND timestamp BETWEEN 1000 AND 2000
//! FIND gps_tracks WHERE timestamp >= now() - 24h ORDER BY timestamp DESC LIMIT 50
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, one_of, satisfy},
    combinator::{map, map_opt, map_res, opt, recognize, value},
    multi::{fold_many0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::index::IndexKey;
use crate::query::ast::*;
use crate::query::error::{QueryError, QueryResult};
use crate::storage::now_millis;

/// Parse a query string into a Query AST
pub fn parse_query(input: &str) -> QueryResult<Query> {
    let input = input.trim();

    match parse_full_query(input) {
        Ok((remaining, query)) => {
            if remaining.trim().is_empty() {
                Ok(query)
            } else {
                Err(QueryError::Parse(format!(
                    "Unexpected input after query: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(QueryError::Parse(format!("Parse error: {:?}", e))),
    }
}

/// Parse the full query
fn parse_full_query(input: &str) -> IResult<&str, Query> {
    let (input, _) = multispace0(input)?;
    let (input, collection) = parse_find_clause(input)?;
    let (input, conditions) = opt(preceded(multispace1, parse_where_clause))(input)?;
    let (input, order_by) = opt(preceded(multispace1, parse_order_by_clause))(input)?;
    let (input, limit) = opt(preceded(multispace1, parse_limit_clause))(input)?;
    let (input, offset) = opt(preceded(multispace1, parse_offset_clause))(input)?;
    let (input, _) = multispace0(input)?;

    Ok((
        input,
        Query {
            collection: collection.to_string(),
            conditions: conditions.unwrap_or_default(),
            order_by,
            limit,
            offset: offset.unwrap_or(0),
        },
    ))
}

/// Parse FIND clause
fn parse_find_clause(input: &str) -> IResult<&str, &str> {
    let (input, _) = tag_no_case("FIND")(input)?;
    let (input, _) = multispace1(input)?;
    parse_identifier(input)
}

/// Parse WHERE clause
fn parse_where_clause(input: &str) -> IResult<&str, Vec<Condition>> {
    let (input, _) = tag_no_case("WHERE")(input)?;
    let (input, _) = multispace1(input)?;

    separated_list1(
        delimited(multispace1, tag_no_case("AND"), multispace1),
        parse_condition,
    )(input)
}

/// Parse a single condition
fn parse_condition(input: &str) -> IResult<&str, Condition> {
    alt((parse_between_condition, parse_compare_condition))(input)
}

/// Parse range condition like "timestamp BETWEEN 1000 AND 2000"
fn parse_between_condition(input: &str) -> IResult<&str, Condition> {
    let (input, field) = parse_identifier(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = tag_no_case("BETWEEN")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, low) = parse_value(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = tag_no_case("AND")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, high) = parse_value(input)?;

    Ok((
        input,
        Condition::Between {
            field: field.to_string(),
            low,
            high,
        },
    ))
}

/// Parse comparison like "voyage_id = 'V1'"
fn parse_compare_condition(input: &str) -> IResult<&str, Condition> {
    let (input, field) = parse_identifier(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = parse_operator(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = parse_value(input)?;

    Ok((
        input,
        Condition::Compare {
            field: field.to_string(),
            op,
            value,
        },
    ))
}

/// Parse ORDER BY clause
fn parse_order_by_clause(input: &str) -> IResult<&str, OrderBy> {
    let (input, _) = tag_no_case("ORDER")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = tag_no_case("BY")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, field) = parse_identifier(input)?;
    let (input, descending) = opt(preceded(
        multispace1,
        alt((
            value(true, tag_no_case("DESC")),
            value(false, tag_no_case("ASC")),
        )),
    ))(input)?;

    Ok((
        input,
        OrderBy {
            field: field.to_string(),
            descending: descending.unwrap_or(false),
        },
    ))
}

/// Parse LIMIT clause
fn parse_limit_clause(input: &str) -> IResult<&str, usize> {
    let (input, _) = tag_no_case("LIMIT")(input)?;
    let (input, _) = multispace1(input)?;
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

/// Parse OFFSET clause
fn parse_offset_clause(input: &str) -> IResult<&str, usize> {
    let (input, _) = tag_no_case("OFFSET")(input)?;
    let (input, _) = multispace1(input)?;
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

/// Parse comparison operator
fn parse_operator(input: &str) -> IResult<&str, Operator> {
    alt((
        value(Operator::Gte, tag(">=")),
        value(Operator::Lte, tag("<=")),
        value(Operator::Ne, alt((tag("!="), tag("<>")))),
        value(Operator::Gt, tag(">")),
        value(Operator::Lt, tag("<")),
        value(Operator::Eq, alt((tag("=="), tag("=")))),
    ))(input)
}

/// Parse a literal value
fn parse_value(input: &str) -> IResult<&str, IndexKey> {
    alt((
        map(parse_quoted_string, IndexKey::String),
        map(parse_relative_time, IndexKey::Int),
        parse_number,
        value(IndexKey::Bool(true), tag_no_case("true")),
        value(IndexKey::Bool(false), tag_no_case("false")),
        value(IndexKey::Null, tag_no_case("null")),
    ))(input)
}

/// Parse relative time like "now() - 7d", in Unix milliseconds.
/// Offsets that overflow the timestamp range fail to parse.
fn parse_relative_time(input: &str) -> IResult<&str, i64> {
    map_opt(
        preceded(
            tag_no_case("now()"),
            opt(preceded(
                tuple((multispace0, char('-'), multispace0)),
                parse_duration,
            )),
        ),
        |offset: Option<Option<i64>>| match offset {
            Some(dur) => dur.and_then(|d| now_millis().checked_sub(d)),
            None => Some(now_millis()),
        },
    )(input)
}

/// Parse duration like "7d", "24h", "30m" into milliseconds, `None` on overflow
fn parse_duration(input: &str) -> IResult<&str, Option<i64>> {
    let (input, num) = map_res(digit1, |s: &str| s.parse::<i64>())(input)?;
    let (input, unit) = alt((
        value(24 * 60 * 60 * 1000i64, alt((tag("d"), tag("D")))),
        value(60 * 60 * 1000i64, alt((tag("h"), tag("H")))),
        value(60 * 1000i64, alt((tag("m"), tag("M")))),
        value(1000i64, alt((tag("s"), tag("S")))),
    ))(input)?;

    Ok((input, num.checked_mul(unit)))
}

/// Parse identifier (collection or field name)
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

/// Parse single- or double-quoted string
fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    alt((quoted('\''), quoted('"')))(input)
}

/// String between `quote` characters, where a doubled quote stands for one
fn quoted<'a>(quote: char) -> impl FnMut(&'a str) -> IResult<&'a str, String> {
    delimited(
        char(quote),
        fold_many0(
            alt((
                value(quote, pair(char(quote), char(quote))),
                satisfy(move |c| c != quote),
            )),
            String::new,
            |mut s, c| {
                s.push(c);
                s
            },
        ),
        char(quote),
    )
}

/// Parse integer or floating point number
fn parse_number(input: &str) -> IResult<&str, IndexKey> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |s: &str| {
            if s.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
                s.parse::<f64>()
                    .map(IndexKey::from_f64)
                    .map_err(|e| e.to_string())
            } else {
                s.parse::<i64>().map(IndexKey::Int).map_err(|e| e.to_string())
            }
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_find() {
        let query = parse_query("FIND voyages").unwrap();
        assert_eq!(query.collection, "voyages");
        assert!(query.conditions.is_empty());
        assert!(query.order_by.is_none());
        assert_eq!(query.limit, None);
    }

    #[test]
    fn test_parse_equality() {
        let query = parse_query("FIND voyages WHERE voyage_id = 'V1'").unwrap();
        assert_eq!(query.conditions, vec![Condition::eq("voyage_id", "V1")]);
    }

    #[test]
    fn test_parse_between_with_and() {
        let query = parse_query(
            "FIND checkpoints WHERE voyage_id = \"V1\" AND timestamp BETWEEN 1000 AND 2000",
        )
        .unwrap();

        assert_eq!(
            query.conditions,
            vec![
                Condition::eq("voyage_id", "V1"),
                Condition::between("timestamp", 1000, 2000),
            ]
        );
    }

    #[test]
    fn test_parse_full_query() {
        let query = parse_query(
            "FIND voyages WHERE ship_id = 'S1' AND departure_time >= 5 \
             ORDER BY departure_time DESC LIMIT 10 OFFSET 20",
        )
        .unwrap();

        assert_eq!(query.conditions.len(), 2);
        assert_eq!(query.order_by, Some(OrderBy::desc("departure_time")));
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, 20);
    }

    #[test]
    fn test_parse_case_insensitive() {
        let query = parse_query("find gps_tracks where timestamp < 10 order by timestamp asc")
            .unwrap();
        assert_eq!(query.collection, "gps_tracks");
        assert_eq!(query.order_by, Some(OrderBy::asc("timestamp")));
    }

    #[test]
    fn test_parse_values() {
        let query = parse_query(
            "FIND t WHERE a = -3 AND b = 2.5 AND c = 4.0 AND d = true AND e = null AND f != 1e3",
        )
        .unwrap();

        let values: Vec<IndexKey> = query
            .conditions
            .into_iter()
            .map(|c| match c {
                Condition::Compare { value, .. } => value,
                Condition::Between { low, .. } => low,
            })
            .collect();
        assert_eq!(
            values,
            vec![
                IndexKey::Int(-3),
                IndexKey::Float(2.5),
                IndexKey::Int(4),
                IndexKey::Bool(true),
                IndexKey::Null,
                IndexKey::Int(1000),
            ]
        );
    }

    #[test]
    fn test_parse_relative_time() {
        let query = parse_query("FIND checkpoints WHERE timestamp >= now() - 7d").unwrap();
        let now = now_millis();
        let seven_days_ms = 7 * 24 * 60 * 60 * 1000;

        match &query.conditions[0] {
            Condition::Compare {
                op: Operator::Gte,
                value: IndexKey::Int(ts),
                ..
            } => {
                assert!(*ts < now);
                assert!(*ts > now - seven_days_ms - 1000);
            }
            other => panic!("unexpected condition: {:?}", other),
        }
    }

    #[test]
    fn test_relative_time_overflow_is_parse_error() {
        for text in [
            "FIND gps_tracks WHERE timestamp >= now() - 9999999999999d",
            "FIND gps_tracks WHERE timestamp >= now() - 99999999999999999999h",
        ] {
            assert!(matches!(parse_query(text), Err(QueryError::Parse(_))), "{}", text);
        }

        // Largest offset that still fits
        assert!(parse_query("FIND gps_tracks WHERE timestamp >= now() - 106751991d").is_ok());
    }

    #[test]
    fn test_display_round_trip() {
        let text = "FIND checkpoints WHERE voyage_id = 'V1' AND timestamp BETWEEN 1 AND 2 \
                    ORDER BY timestamp DESC LIMIT 3";
        let query = parse_query(text).unwrap();
        assert_eq!(parse_query(&query.to_string()).unwrap(), query);
    }

    #[test]
    fn test_quotes_inside_strings() {
        let query = parse_query(r#"FIND voyages WHERE ship_name = 'O''Brien' AND note = "say ""ahoy""""#).unwrap();
        assert_eq!(
            query.conditions,
            vec![
                Condition::eq("ship_name", "O'Brien"),
                Condition::eq("note", "say \"ahoy\""),
            ]
        );

        let query = Query::find("voyages")
            .where_eq("ship_name", "O'Brien's \"Dawn\"")
            .where_eq("note", "''")
            .build();
        assert_eq!(parse_query(&query.to_string()).unwrap(), query);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_query("SELECT mood").is_err());
        assert!(parse_query("FIND").is_err());
        assert!(parse_query("FIND voyages WHERE").is_err());
        assert!(parse_query("FIND voyages WHERE voyage_id ~ 'V1'").is_err());
        assert!(parse_query("FIND voyages LIMIT ten").is_err());
    }
}
