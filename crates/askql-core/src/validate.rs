//! Safety and quality checks on generated queries
//!
//! Two strategies:
//! - Heuristic: static inspection of the parsed SQL
//! - Model: a second text-generation call, combined with the blocking
//!   static checks so the model alone can never approve a mutating or
//!   unparseable query
//!
//! A validator that cannot reach a verdict always answers "invalid".

use serde_json::json;
use sqlparser::ast::{
    Join, JoinConstraint, JoinOperator, Query, SelectItem, SetExpr, Statement, TableFactor,
    TableWithJoins,
};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ValidationMode;
use crate::llm::{
    generate_within, Generation, GenerationParams, GenerationRequest, ResponseSchema,
    TextGenerator,
};
use crate::model::{GeneratedQuery, ValidatedQuery, ValidationVerdict};

/// Functions that reach outside the database: files, globbing, the process
/// environment, secrets and foreign databases.
const EXTERNAL_FUNCTIONS: &[&str] = &[
    "read_text",
    "read_blob",
    "read_csv",
    "read_csv_auto",
    "sniff_csv",
    "read_parquet",
    "parquet_scan",
    "parquet_metadata",
    "parquet_schema",
    "parquet_file_metadata",
    "parquet_kv_metadata",
    "read_json",
    "read_json_auto",
    "read_json_objects",
    "read_json_objects_auto",
    "read_ndjson",
    "read_ndjson_auto",
    "read_ndjson_objects",
    "read_xlsx",
    "st_read",
    "glob",
    "getenv",
    "duckdb_secrets",
    "query",
    "query_table",
    "sqlite_scan",
    "postgres_scan",
    "postgres_query",
    "mysql_scan",
    "mysql_query",
    "iceberg_scan",
    "delta_scan",
];

const REVIEW_PROMPT: &str = r#"You review SQL generated from natural language before it runs on a large, pay-per-byte analytical engine.

Reject the query (is_valid = false) if ANY of the following holds:
- it could modify data or schema, or contains more than one statement (injection risk)
- it is not syntactically valid SQL
- it has no LIMIT on an unbounded scan
- it joins tables without a join condition, or uses CROSS JOIN on large tables
- it scans whole tables with no filter where a filter is clearly implied by the question

List every problem in `issues` and a concrete fix for each in `suggestions`.
Call the `review_query` function with your verdict."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Fails the verdict
    Blocking,
    /// Reported but the verdict stays valid
    Advisory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub severity: Severity,
    pub issue: String,
    pub suggestion: Option<String>,
}

impl Finding {
    fn blocking(issue: impl Into<String>, suggestion: Option<&str>) -> Self {
        Self {
            severity: Severity::Blocking,
            issue: issue.into(),
            suggestion: suggestion.map(String::from),
        }
    }

    fn advisory(issue: impl Into<String>, suggestion: &str) -> Self {
        Self {
            severity: Severity::Advisory,
            issue: issue.into(),
            suggestion: Some(suggestion.to_string()),
        }
    }
}

/// Statically inspect a query.
pub fn inspect(sql: &str) -> Vec<Finding> {
    let dialect = DuckDbDialect {};
    let mut findings = Vec::new();

    match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => {
            let has_comment = tokens.iter().any(|t| {
                matches!(
                    t,
                    Token::Whitespace(Whitespace::SingleLineComment { .. })
                        | Token::Whitespace(Whitespace::MultiLineComment(_))
                )
            });
            if has_comment {
                findings.push(Finding::blocking(
                    "Query contains an SQL comment (possible injection)",
                    Some("Remove comments from the query"),
                ));
            }
            inspect_external_access(&tokens, &mut findings);
        }
        Err(e) => {
            findings.push(Finding::blocking(
                format!("Query is not valid SQL: {}", e),
                Some("Rephrase the question so a simpler query can be generated"),
            ));
            return findings;
        }
    }

    let statements = match Parser::parse_sql(&dialect, sql) {
        Ok(statements) => statements,
        Err(e) => {
            findings.push(Finding::blocking(
                format!("Query is not valid SQL: {}", e),
                Some("Rephrase the question so a simpler query can be generated"),
            ));
            return findings;
        }
    };

    if statements.is_empty() {
        findings.push(Finding::blocking("Query is empty", None));
        return findings;
    }
    if statements.len() > 1 {
        findings.push(Finding::blocking(
            format!(
                "Query contains {} statements (possible injection)",
                statements.len()
            ),
            Some("Ask for one result at a time"),
        ));
    }

    for statement in &statements {
        match statement {
            Statement::Query(query) => {
                if query.limit.is_none() && query.fetch.is_none() {
                    findings.push(Finding::blocking(
                        "missing LIMIT clause",
                        Some("Add a LIMIT clause to bound the number of rows returned"),
                    ));
                }
                inspect_query(query, &mut findings);
            }
            other => findings.push(Finding::blocking(
                format!("Only read-only SELECT queries are allowed, got: {}", statement_kind(other)),
                Some("Ask a question about the data rather than asking to change it"),
            )),
        }
    }

    findings
}

/// Calls to file, environment or foreign-database functions, and file paths
/// used in place of a table name (`FROM 'data.csv'`).
fn inspect_external_access(tokens: &[Token], findings: &mut Vec<Finding>) {
    let significant: Vec<&Token> = tokens
        .iter()
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .collect();

    for (i, token) in significant.iter().enumerate() {
        let next = significant.get(i + 1);

        if let (Token::Word(word), Some(Token::LParen)) = (token, next) {
            let name = word.value.to_lowercase();
            if EXTERNAL_FUNCTIONS.contains(&name.as_str()) {
                findings.push(Finding::blocking(
                    format!("Query calls {}(), which reads outside the database", name),
                    Some("Ask about the tables in the database catalog"),
                ));
            }
        }

        let after_relation_keyword = matches!(
            token,
            Token::Word(w) if w.keyword == Keyword::FROM || w.keyword == Keyword::JOIN
        );
        if !after_relation_keyword {
            continue;
        }
        let path = match next {
            Some(Token::SingleQuotedString(path)) | Some(Token::DoubleQuotedString(path)) => {
                Some(path.as_str())
            }
            Some(Token::Word(w)) if w.quote_style.is_some() && looks_like_path(&w.value) => {
                Some(w.value.as_str())
            }
            _ => None,
        };
        if let Some(path) = path {
            findings.push(Finding::blocking(
                format!("Query reads the file '{}' directly", path),
                Some("Ask about the tables in the database catalog"),
            ));
        }
    }
}

fn looks_like_path(name: &str) -> bool {
    name.contains('/') || name.contains('\\') || name.contains('.')
}

fn statement_kind(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_uppercase()
}

fn inspect_query(query: &Query, findings: &mut Vec<Finding>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            inspect_query(&cte.query, findings);
        }
    }
    inspect_set_expr(&query.body, findings);
}

fn inspect_set_expr(body: &SetExpr, findings: &mut Vec<Finding>) {
    match body {
        SetExpr::Select(select) => {
            if select.into.is_some() {
                findings.push(Finding::blocking(
                    "SELECT INTO creates a table",
                    Some("Ask a question about the data rather than asking to store it"),
                ));
            }

            let wildcard = select.projection.iter().any(|item| {
                matches!(
                    item,
                    SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..)
                )
            });
            if wildcard {
                findings.push(Finding::advisory(
                    "SELECT * reads every column",
                    "Name only the columns you need to reduce bytes scanned",
                ));
            }

            if select.from.len() > 1 && select.selection.is_none() {
                findings.push(Finding::blocking(
                    "Comma-separated tables without a WHERE clause form a cross join",
                    Some("Join the tables with an explicit ON condition"),
                ));
            }

            if !select.from.is_empty() && select.selection.is_none() {
                findings.push(Finding::advisory(
                    "Query scans whole tables without a filter",
                    "Narrow the question, e.g. to a date range or category, so a WHERE clause can be added",
                ));
            }

            for table in &select.from {
                inspect_table(table, findings);
            }
        }
        SetExpr::Query(query) => inspect_query(query, findings),
        SetExpr::SetOperation { left, right, .. } => {
            inspect_set_expr(left, findings);
            inspect_set_expr(right, findings);
        }
        SetExpr::Values(_) | SetExpr::Table(_) => {}
        _ => findings.push(Finding::blocking(
            "Query body modifies data",
            Some("Ask a question about the data rather than asking to change it"),
        )),
    }
}

fn inspect_table(table: &TableWithJoins, findings: &mut Vec<Finding>) {
    inspect_factor(&table.relation, findings);
    for join in &table.joins {
        inspect_join(join, findings);
        inspect_factor(&join.relation, findings);
    }
}

fn inspect_factor(factor: &TableFactor, findings: &mut Vec<Finding>) {
    if let TableFactor::Derived { subquery, .. } = factor {
        inspect_query(subquery, findings);
    }
}

fn inspect_join(join: &Join, findings: &mut Vec<Finding>) {
    let unconditioned = match &join.join_operator {
        JoinOperator::CrossJoin => true,
        JoinOperator::Inner(constraint)
        | JoinOperator::LeftOuter(constraint)
        | JoinOperator::RightOuter(constraint)
        | JoinOperator::FullOuter(constraint) => matches!(constraint, JoinConstraint::None),
        _ => false,
    };
    if unconditioned {
        findings.push(Finding::blocking(
            format!("Join on {} has no join condition (cross join)", join.relation),
            Some("Join the tables with an explicit ON condition"),
        ));
    }
}

/// Fold findings into a verdict. Suggestions from every finding are kept.
pub fn verdict_from(findings: &[Finding]) -> ValidationVerdict {
    let mut verdict = ValidationVerdict::valid();
    for finding in findings {
        if finding.severity == Severity::Blocking {
            verdict.is_valid = false;
        }
        verdict.issues.push(finding.issue.clone());
        if let Some(suggestion) = &finding.suggestion {
            if !verdict.suggestions.contains(suggestion) {
                verdict.suggestions.push(suggestion.clone());
            }
        }
    }
    verdict
}

fn review_schema() -> ResponseSchema {
    ResponseSchema {
        name: "review_query".to_string(),
        description: "Report whether the SQL query is safe and efficient to run".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "is_valid": { "type": "boolean" },
                "issues": { "type": "array", "items": { "type": "string" } },
                "suggestions": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["is_valid", "issues", "suggestions"],
            "additionalProperties": false
        }),
    }
}

pub struct QueryValidator {
    mode: ValidationMode,
    llm: Option<Arc<dyn TextGenerator>>,
    params: GenerationParams,
    timeout: Duration,
}

impl QueryValidator {
    pub fn heuristic() -> Self {
        Self {
            mode: ValidationMode::Heuristic,
            llm: None,
            params: GenerationParams::new(0.0, 512),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn model(llm: Arc<dyn TextGenerator>, params: GenerationParams, timeout: Duration) -> Self {
        Self {
            mode: ValidationMode::Model,
            llm: Some(llm),
            params,
            timeout,
        }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub async fn validate(&self, query_text: &str) -> ValidationVerdict {
        let findings = inspect(query_text);
        let static_verdict = verdict_from(&findings);

        let llm = match (self.mode, &self.llm) {
            (ValidationMode::Model, Some(llm)) => llm,
            _ => return static_verdict,
        };

        let mut verdict = self.review(llm.as_ref(), query_text).await;

        // Blocking static findings always win over the model.
        let blocking: Vec<Finding> = findings
            .into_iter()
            .filter(|f| f.severity == Severity::Blocking)
            .collect();
        if !blocking.is_empty() {
            verdict.is_valid = false;
            let extra = verdict_from(&blocking);
            for issue in extra.issues {
                if !verdict.issues.contains(&issue) {
                    verdict.issues.push(issue);
                }
            }
            for suggestion in extra.suggestions {
                if !verdict.suggestions.contains(&suggestion) {
                    verdict.suggestions.push(suggestion);
                }
            }
        }
        verdict
    }

    async fn review(&self, llm: &dyn TextGenerator, query_text: &str) -> ValidationVerdict {
        let request = GenerationRequest {
            system: REVIEW_PROMPT.to_string(),
            prompt: format!("Review this query:\n\n{}", query_text),
            params: self.params,
            schema: Some(review_schema()),
        };

        let value = match generate_within(llm, request, self.timeout).await {
            Ok(Generation::Structured(value)) => value,
            Ok(Generation::Text(_)) => {
                tracing::warn!("Validator received free text instead of a verdict");
                return ValidationVerdict::invalid(
                    "Query validation failed: reviewer returned no verdict",
                );
            }
            Err(e) => {
                tracing::warn!("Validator call failed: {}", e);
                return ValidationVerdict::invalid(format!("Query validation failed: {}", e));
            }
        };

        match serde_json::from_value::<ValidationVerdict>(value) {
            Ok(mut verdict) => {
                if !verdict.is_valid && verdict.issues.is_empty() {
                    verdict
                        .issues
                        .push("Reviewer rejected the query without giving a reason".to_string());
                }
                verdict
            }
            Err(e) => {
                tracing::warn!("Validator verdict was malformed: {}", e);
                ValidationVerdict::invalid(format!(
                    "Query validation failed: malformed verdict ({})",
                    e
                ))
            }
        }
    }
}

/// Promote a query to [`ValidatedQuery`] when its verdict is valid.
pub fn approve(
    query: GeneratedQuery,
    verdict: ValidationVerdict,
) -> Result<ValidatedQuery, ValidationVerdict> {
    if verdict.is_valid {
        Ok(ValidatedQuery::new(query, verdict))
    } else {
        Err(verdict)
    }
}
