#![forbid(unsafe_code)]

use crate::store::QueryError;
use sqlparser::ast::{
    Expr, GroupByExpr, JoinOperator, ObjectName, OrderByExpr, Query, SetExpr, Statement,
    TableFactor, TableWithJoins, Value, visit_expressions,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use tb_core::is_pseudo_table;

/// One table reference of the FROM clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationRef {
    pub table: String,
    pub alias: Option<String>,
}

impl RelationRef {
    /// Name the relation's columns are qualified with.
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Column whose uniqueness makes paging deterministic.
    pub fn tie_breaker(&self) -> &'static str {
        "id"
    }
}

/// A query accepted by the restricted dialect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedQuery {
    pub source: String,
    /// The SELECT without LIMIT/OFFSET, always carrying an ORDER BY.
    pub body_sql: String,
    pub relations: Vec<RelationRef>,
    /// Rendered ordering terms of the paging contract.
    pub order_by: Vec<String>,
    pub explicit_order: bool,
    pub limit: Option<u64>,
    pub offset: u64,
    /// `:name` placeholders, without the colon.
    pub variables: BTreeSet<String>,
}

impl ParsedQuery {
    /// Distinct referenced table names, case-folded.
    pub fn table_keys(&self) -> BTreeSet<String> {
        self.relations
            .iter()
            .map(|relation| relation.table.to_lowercase())
            .collect()
    }
}

pub fn parse_query(sql: &str) -> Result<ParsedQuery, QueryError> {
    let source = sql.trim();
    if source.is_empty() {
        return Err(QueryError::EmptyQuery);
    }

    let mut statements = Parser::parse_sql(&SQLiteDialect {}, source)?;
    let statement = match statements.len() {
        0 => return Err(QueryError::EmptyQuery),
        1 => statements.remove(0),
        _ => return Err(QueryError::MultipleStatements),
    };
    let Statement::Query(mut query) = statement else {
        return Err(unsupported("only SELECT statements are allowed"));
    };

    check_query_shape(&query)?;
    let relations = collect_relations(&query)?;
    let variables = collect_variables(&query)?;
    let limit = query.limit.as_ref().map(literal_u64).transpose()?;
    let offset = query
        .offset
        .as_ref()
        .map(|offset| literal_u64(&offset.value))
        .transpose()?
        .unwrap_or(0);

    let explicit_order = !query.order_by.is_empty();
    let order_by = if explicit_order {
        check_tie_breakers(&query.order_by, &relations)?;
        query.order_by.iter().map(ToString::to_string).collect()
    } else {
        relations
            .iter()
            .map(|relation| {
                format!(
                    "{}.{} ASC",
                    quote_ident(relation.qualifier()),
                    quote_ident(relation.tie_breaker())
                )
            })
            .collect::<Vec<_>>()
    };

    query.limit = None;
    query.offset = None;
    let mut body_sql = query.to_string();
    if !explicit_order {
        body_sql.push_str(" ORDER BY ");
        body_sql.push_str(&order_by.join(", "));
    }

    Ok(ParsedQuery {
        source: source.to_string(),
        body_sql,
        relations,
        order_by,
        explicit_order,
        limit,
        offset,
        variables,
    })
}

fn unsupported(what: &str) -> QueryError {
    QueryError::Unsupported(what.to_string())
}

pub(in crate::store) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn check_query_shape(query: &Query) -> Result<(), QueryError> {
    if query.with.is_some() {
        return Err(unsupported("WITH"));
    }
    if query.fetch.is_some() {
        return Err(unsupported("FETCH"));
    }
    if !query.locks.is_empty() {
        return Err(unsupported("locking clauses"));
    }

    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        SetExpr::SetOperation { .. } => return Err(unsupported("set operations")),
        SetExpr::Query(_) => return Err(unsupported("subqueries")),
        _ => return Err(unsupported("only plain SELECT bodies are allowed")),
    };

    if select.distinct.is_some() {
        return Err(unsupported("DISTINCT"));
    }
    if select.top.is_some() {
        return Err(unsupported("TOP"));
    }
    if select.into.is_some() {
        return Err(unsupported("INTO"));
    }
    match &select.group_by {
        GroupByExpr::Expressions(exprs) if exprs.is_empty() => {}
        _ => return Err(unsupported("GROUP BY")),
    }
    if select.having.is_some() {
        return Err(unsupported("HAVING"));
    }
    if !select.lateral_views.is_empty() {
        return Err(unsupported("LATERAL VIEW"));
    }
    if !select.named_window.is_empty() {
        return Err(unsupported("WINDOW"));
    }
    if select.qualify.is_some() {
        return Err(unsupported("QUALIFY"));
    }
    if select.from.is_empty() {
        return Err(unsupported("a FROM clause is required"));
    }
    Ok(())
}

fn collect_relations(query: &Query) -> Result<Vec<RelationRef>, QueryError> {
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(unsupported("only plain SELECT bodies are allowed"));
    };
    let mut out = Vec::new();
    for table in &select.from {
        collect_from_table(table, &mut out)?;
    }

    let mut seen = BTreeSet::new();
    for relation in &out {
        if !seen.insert(relation.qualifier().to_lowercase()) {
            return Err(QueryError::Unsupported(format!(
                "relation {} appears twice; give each occurrence an alias",
                relation.qualifier()
            )));
        }
    }
    Ok(out)
}

fn collect_from_table(
    table: &TableWithJoins,
    out: &mut Vec<RelationRef>,
) -> Result<(), QueryError> {
    collect_factor(&table.relation, out)?;
    for join in &table.joins {
        match &join.join_operator {
            JoinOperator::Inner(_)
            | JoinOperator::LeftOuter(_)
            | JoinOperator::RightOuter(_)
            | JoinOperator::FullOuter(_)
            | JoinOperator::CrossJoin => {}
            _ => return Err(unsupported("this join kind")),
        }
        collect_factor(&join.relation, out)?;
    }
    Ok(())
}

fn collect_factor(factor: &TableFactor, out: &mut Vec<RelationRef>) -> Result<(), QueryError> {
    match factor {
        TableFactor::Table {
            name, alias, args, ..
        } => {
            if args.is_some() {
                return Err(unsupported("table-valued functions"));
            }
            let table = single_part_name(name)?;
            let alias = match alias {
                Some(alias) if !alias.columns.is_empty() => {
                    return Err(unsupported("column lists in table aliases"));
                }
                Some(alias) => Some(alias.name.value.clone()),
                None => None,
            };
            out.push(RelationRef { table, alias });
            Ok(())
        }
        TableFactor::NestedJoin {
            table_with_joins,
            alias: None,
        } => collect_from_table(table_with_joins, out),
        TableFactor::Derived { .. } => Err(unsupported("subqueries")),
        TableFactor::TableFunction { .. } => Err(unsupported("table-valued functions")),
        _ => Err(unsupported("this table expression")),
    }
}

fn single_part_name(name: &ObjectName) -> Result<String, QueryError> {
    match name.0.as_slice() {
        [ident] => Ok(ident.value.clone()),
        _ => Err(QueryError::Unsupported(format!(
            "qualified table name {name}"
        ))),
    }
}

fn collect_variables(query: &Query) -> Result<BTreeSet<String>, QueryError> {
    let mut variables = BTreeSet::new();
    let flow = visit_expressions(query, |expr| {
        match expr {
            Expr::Subquery(_) | Expr::Exists { .. } | Expr::InSubquery { .. } => {
                return ControlFlow::Break(unsupported("subqueries"));
            }
            Expr::Value(Value::Placeholder(placeholder)) => {
                match placeholder_name(placeholder) {
                    Ok(name) => {
                        variables.insert(name);
                    }
                    Err(err) => return ControlFlow::Break(err),
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    });
    match flow {
        ControlFlow::Break(err) => Err(err),
        ControlFlow::Continue(()) => Ok(variables),
    }
}

/// Only named `:name` placeholders; names starting with `__` are internal.
fn placeholder_name(placeholder: &str) -> Result<String, QueryError> {
    let Some(name) = placeholder.strip_prefix(':') else {
        return Err(QueryError::Unsupported(format!(
            "placeholder {placeholder}; use :name"
        )));
    };
    let valid = !name.is_empty()
        && !name.starts_with("__")
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(QueryError::InvalidVariable {
            name: name.to_string(),
            message: "variable names are letters, digits and underscores".to_string(),
        });
    }
    Ok(name.to_string())
}

fn literal_u64(expr: &Expr) -> Result<u64, QueryError> {
    match expr {
        Expr::Value(Value::Number(text, _)) => text
            .parse::<u64>()
            .map_err(|_| unsupported("LIMIT/OFFSET must be a non-negative integer literal")),
        _ => Err(unsupported("LIMIT/OFFSET must be a non-negative integer literal")),
    }
}

/// Every relation's `id` must be an ordering term. With several relations
/// the term must be qualified.
fn check_tie_breakers(
    order_by: &[OrderByExpr],
    relations: &[RelationRef],
) -> Result<(), QueryError> {
    let terms: Vec<Vec<String>> = order_by
        .iter()
        .filter_map(|item| match &item.expr {
            Expr::Identifier(ident) => Some(vec![ident.value.to_lowercase()]),
            Expr::CompoundIdentifier(parts) => Some(
                parts
                    .iter()
                    .map(|part| part.value.to_lowercase())
                    .collect(),
            ),
            _ => None,
        })
        .collect();

    let single = relations.len() == 1;
    let mut missing = Vec::new();
    for relation in relations {
        let qualifier = relation.qualifier().to_lowercase();
        let accepted: Vec<&str> = if is_pseudo_table(&relation.table)
            && relation.table.eq_ignore_ascii_case("entries")
        {
            vec!["id", "entry_id"]
        } else {
            vec![relation.tie_breaker()]
        };
        let found = terms.iter().any(|term| match term.as_slice() {
            [column] => single && accepted.contains(&column.as_str()),
            [table, column] => *table == qualifier && accepted.contains(&column.as_str()),
            _ => false,
        });
        if !found {
            missing.push(if single {
                relation.tie_breaker().to_string()
            } else {
                format!("{}.{}", relation.qualifier(), relation.tie_breaker())
            });
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(QueryError::MissingTieBreaker(missing.join(", ")))
    }
}
