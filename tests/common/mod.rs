//! In-memory MonetDB stand-in speaking the line-tagged response protocol.
//!
//! Understands the statement shapes the adapter issues: transactions,
//! `CREATE TABLE`, single-row `INSERT`, and `SELECT` with conjunctive
//! predicates, `ILIKE` and `ORDER BY`. Results larger than the page size are
//! served through `Xexport`.

#![allow(dead_code)]

use async_trait::async_trait;
use monet_adapter::config::AdapterConfig;
use monet_adapter::db::{Connector, PoolConfig, Transport};
use monet_adapter::remote::{
    Label, LabelMatcher, MatchType, Query, ReadRequest, Sample, TimeSeries, WriteRequest,
    METRIC_NAME_LABEL,
};
use monet_adapter::{Adapter, Error, Result};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
}

impl Cell {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Double(v) => Some(*v),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Cell::Null => "NULL".to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::Int(v) => v.to_string(),
            Cell::Double(v) => v.to_string(),
            Cell::Text(s) => {
                let mut out = String::from("\"");
                for c in s.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '"' => out.push_str("\\\""),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        other => out.push(other),
                    }
                }
                out.push('"');
                out
            }
        }
    }

    fn plain(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            other => other.render(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ColType {
    BigInt,
    Double,
    Boolean,
    Varchar(usize),
}

impl ColType {
    fn wire_name(&self) -> &'static str {
        match self {
            ColType::BigInt => "bigint",
            ColType::Double => "double",
            ColType::Boolean => "boolean",
            ColType::Varchar(_) => "varchar",
        }
    }
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    ty: ColType,
}

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, Default)]
struct Database {
    tables: BTreeMap<String, Table>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Eq,
    Neq,
    Ge,
    Le,
    Gt,
    Lt,
    ILike,
    NotILike,
}

#[derive(Debug, Clone)]
struct Filter {
    column: String,
    op: Op,
    value: Cell,
}

#[derive(Debug, Clone)]
enum Statement {
    Begin,
    Commit,
    Rollback,
    Create {
        name: String,
        columns: Vec<Column>,
    },
    Insert {
        table: String,
        values: Vec<Cell>,
    },
    Select {
        columns: Vec<String>,
        table: String,
        filters: Vec<Filter>,
        order_by: Option<String>,
    },
}

enum Outcome {
    Schema,
    Update(usize),
    Rows(Vec<Column>, Vec<Vec<Cell>>),
}

// ---------------------------------------------------------------------------
// SQL parsing

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Ident(String),
    Str(String),
    Num(String),
    Sym(&'static str),
}

fn tokenize(sql: &str) -> std::result::Result<Vec<Tok>, String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' {
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err("unterminated string literal".to_string()),
                    Some('\\') => {
                        let escaped = chars.get(i + 1).ok_or("dangling escape")?;
                        s.push(*escaped);
                        i += 2;
                    }
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        s.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(other) => {
                        s.push(*other);
                        i += 1;
                    }
                }
            }
            toks.push(Tok::Str(s));
        } else if c == '"' {
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err("unterminated identifier".to_string()),
                    Some('"') if chars.get(i + 1) == Some(&'"') => {
                        s.push('"');
                        i += 2;
                    }
                    Some('"') => {
                        i += 1;
                        break;
                    }
                    Some(other) => {
                        s.push(*other);
                        i += 1;
                    }
                }
            }
            toks.push(Tok::Ident(s));
        } else if c.is_ascii_digit()
            || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
        {
            let start = i;
            i += 1;
            while let Some(&n) = chars.get(i) {
                let exponent_sign =
                    (n == '-' || n == '+') && matches!(chars.get(i - 1), Some('e') | Some('E'));
                if n.is_ascii_digit() || n == '.' || n == 'e' || n == 'E' || exponent_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            toks.push(Tok::Num(chars[start..i].iter().collect()));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while chars
                .get(i)
                .is_some_and(|n| n.is_alphanumeric() || *n == '_' || *n == ':')
            {
                i += 1;
            }
            toks.push(Tok::Word(chars[start..i].iter().collect()));
        } else {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let sym = match two.as_str() {
                "!=" => Some("!="),
                ">=" => Some(">="),
                "<=" => Some("<="),
                _ => None,
            };
            if let Some(sym) = sym {
                toks.push(Tok::Sym(sym));
                i += 2;
                continue;
            }
            let sym = match c {
                '(' => "(",
                ')' => ")",
                ',' => ",",
                '.' => ".",
                '=' => "=",
                '>' => ">",
                '<' => "<",
                ';' => ";",
                '*' => "*",
                other => return Err(format!("unexpected character {:?}", other)),
            };
            toks.push(Tok::Sym(sym));
            i += 1;
        }
    }
    Ok(toks)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> std::result::Result<Tok, String> {
        let tok = self
            .toks
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of statement".to_string())?;
        self.pos += 1;
        Ok(tok)
    }

    fn is_word(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Word(w)) if w.eq_ignore_ascii_case(kw))
    }

    fn eat_word(&mut self, kw: &str) -> bool {
        if self.is_word(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, kw: &str) -> std::result::Result<(), String> {
        if self.eat_word(kw) {
            Ok(())
        } else {
            Err(format!("expected {} near {:?}", kw, self.peek()))
        }
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Sym(s)) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> std::result::Result<(), String> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(format!("expected '{}' near {:?}", sym, self.peek()))
        }
    }

    fn name(&mut self) -> std::result::Result<String, String> {
        let mut name = match self.next()? {
            Tok::Word(w) => w.to_ascii_lowercase(),
            Tok::Ident(i) => i,
            other => return Err(format!("expected a name, got {:?}", other)),
        };
        if self.eat_sym(".") {
            name = format!("{}.{}", name, self.name()?);
        }
        Ok(name)
    }

    fn literal(&mut self) -> std::result::Result<Cell, String> {
        match self.next()? {
            Tok::Str(s) => Ok(Cell::Text(s)),
            Tok::Num(n) => match n.parse::<i64>() {
                Ok(v) => Ok(Cell::Int(v)),
                Err(_) => n
                    .parse::<f64>()
                    .map(Cell::Double)
                    .map_err(|_| format!("invalid number {}", n)),
            },
            Tok::Word(w) if w.eq_ignore_ascii_case("true") => Ok(Cell::Bool(true)),
            Tok::Word(w) if w.eq_ignore_ascii_case("false") => Ok(Cell::Bool(false)),
            Tok::Word(w) if w.eq_ignore_ascii_case("null") => Ok(Cell::Null),
            other => Err(format!("expected a literal, got {:?}", other)),
        }
    }

    fn done(&mut self) -> std::result::Result<(), String> {
        self.eat_sym(";");
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(format!("unexpected trailing {:?}", tok)),
        }
    }
}

fn parse(sql: &str) -> std::result::Result<Statement, String> {
    let mut p = Parser {
        toks: tokenize(sql)?,
        pos: 0,
    };

    let stmt = if p.eat_word("START") {
        p.expect_word("TRANSACTION")?;
        Statement::Begin
    } else if p.eat_word("COMMIT") {
        Statement::Commit
    } else if p.eat_word("ROLLBACK") {
        Statement::Rollback
    } else if p.eat_word("CREATE") {
        p.expect_word("TABLE")?;
        let name = p.name()?;
        p.expect_sym("(")?;
        let mut columns = Vec::new();
        loop {
            let column = p.name()?;
            let ty = match p.next()? {
                Tok::Word(w) => match w.to_ascii_uppercase().as_str() {
                    "BIGINT" => ColType::BigInt,
                    "DOUBLE" | "FLOAT" => ColType::Double,
                    "BOOLEAN" => ColType::Boolean,
                    "VARCHAR" => {
                        p.expect_sym("(")?;
                        let width = match p.next()? {
                            Tok::Num(n) => n.parse().map_err(|_| "bad width".to_string())?,
                            other => return Err(format!("bad width {:?}", other)),
                        };
                        p.expect_sym(")")?;
                        ColType::Varchar(width)
                    }
                    other => return Err(format!("unsupported type {}", other)),
                },
                other => return Err(format!("expected a type, got {:?}", other)),
            };
            columns.push(Column { name: column, ty });
            if !p.eat_sym(",") {
                break;
            }
        }
        p.expect_sym(")")?;
        Statement::Create { name, columns }
    } else if p.eat_word("INSERT") {
        p.expect_word("INTO")?;
        let table = p.name()?;
        p.expect_word("VALUES")?;
        p.expect_sym("(")?;
        let mut values = vec![p.literal()?];
        while p.eat_sym(",") {
            values.push(p.literal()?);
        }
        p.expect_sym(")")?;
        Statement::Insert { table, values }
    } else if p.eat_word("SELECT") {
        let mut columns = vec![p.name()?];
        while p.eat_sym(",") {
            columns.push(p.name()?);
        }
        p.expect_word("FROM")?;
        let table = p.name()?;
        let mut filters = Vec::new();
        if p.eat_word("WHERE") {
            loop {
                let column = p.name()?;
                let op = if p.eat_sym("=") {
                    Op::Eq
                } else if p.eat_sym("!=") {
                    Op::Neq
                } else if p.eat_sym(">=") {
                    Op::Ge
                } else if p.eat_sym("<=") {
                    Op::Le
                } else if p.eat_sym(">") {
                    Op::Gt
                } else if p.eat_sym("<") {
                    Op::Lt
                } else if p.eat_word("ILIKE") {
                    Op::ILike
                } else if p.eat_word("NOT") {
                    p.expect_word("ILIKE")?;
                    Op::NotILike
                } else {
                    return Err(format!("unsupported operator near {:?}", p.peek()));
                };
                let value = p.literal()?;
                filters.push(Filter { column, op, value });
                if !p.eat_word("AND") {
                    break;
                }
            }
        }
        let order_by = if p.eat_word("ORDER") {
            p.expect_word("BY")?;
            Some(p.name()?)
        } else {
            None
        };
        Statement::Select {
            columns,
            table,
            filters,
            order_by,
        }
    } else {
        return Err(format!("unsupported statement: {}", sql));
    };

    p.done()?;
    Ok(stmt)
}

// ---------------------------------------------------------------------------
// Execution

fn ilike(text: &str, pattern: &str) -> bool {
    fn go(t: &[char], p: &[char]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some(('%', rest)) => (0..=t.len()).any(|i| go(&t[i..], rest)),
            Some(('_', rest)) => !t.is_empty() && go(&t[1..], rest),
            Some((c, rest)) => t.first() == Some(c) && go(&t[1..], rest),
        }
    }
    let t: Vec<char> = text.to_lowercase().chars().collect();
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    go(&t, &p)
}

fn compare(cell: &Cell, op: Op, value: &Cell) -> bool {
    let equal = match (cell.as_f64(), value.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => cell == value,
    };
    match op {
        Op::Eq => equal,
        Op::Neq => !equal && !matches!(cell, Cell::Null),
        Op::Ge | Op::Le | Op::Gt | Op::Lt => match (cell.as_f64(), value.as_f64()) {
            (Some(a), Some(b)) => match op {
                Op::Ge => a >= b,
                Op::Le => a <= b,
                Op::Gt => a > b,
                _ => a < b,
            },
            _ => false,
        },
        Op::ILike | Op::NotILike => match (cell, value) {
            (Cell::Text(t), Cell::Text(p)) => (op == Op::ILike) == ilike(t, p),
            _ => false,
        },
    }
}

fn sys_tables(db: &Database) -> Table {
    Table {
        columns: vec![
            Column {
                name: "name".to_string(),
                ty: ColType::Varchar(1024),
            },
            Column {
                name: "system".to_string(),
                ty: ColType::Boolean,
            },
        ],
        rows: db
            .tables
            .keys()
            .map(|name| vec![Cell::Text(name.clone()), Cell::Bool(false)])
            .collect(),
    }
}

fn execute(db: &mut Database, stmt: &Statement) -> std::result::Result<Outcome, String> {
    match stmt {
        Statement::Create { name, columns } => {
            if db.tables.contains_key(name) {
                return Err(format!("42S01!CREATE TABLE: name '{}' already in use", name));
            }
            db.tables.insert(
                name.clone(),
                Table {
                    columns: columns.clone(),
                    rows: Vec::new(),
                },
            );
            Ok(Outcome::Schema)
        }
        Statement::Insert { table, values } => {
            let target = db
                .tables
                .get_mut(table)
                .ok_or_else(|| format!("42S02!INSERT INTO: no such table '{}'", table))?;
            if values.len() != target.columns.len() {
                return Err(format!(
                    "21S01!INSERT INTO: number of values doesn't match number of columns of table '{}'",
                    table
                ));
            }
            let mut row = Vec::with_capacity(values.len());
            for (value, column) in values.iter().zip(&target.columns) {
                let cell = match (column.ty, value) {
                    (_, Cell::Null) => Cell::Null,
                    (ColType::BigInt, Cell::Int(v)) => Cell::Int(*v),
                    (ColType::Double, Cell::Int(v)) => Cell::Double(*v as f64),
                    (ColType::Double, Cell::Double(v)) => Cell::Double(*v),
                    (ColType::Boolean, Cell::Bool(v)) => Cell::Bool(*v),
                    (ColType::Varchar(width), Cell::Text(s)) => {
                        if s.chars().count() > width {
                            return Err(format!(
                                "22001!value too long for type (var)char({})",
                                width
                            ));
                        }
                        Cell::Text(s.clone())
                    }
                    (ty, other) => {
                        return Err(format!(
                            "22018!conversion of {:?} to {} failed",
                            other,
                            ty.wire_name()
                        ))
                    }
                };
                row.push(cell);
            }
            target.rows.push(row);
            Ok(Outcome::Update(1))
        }
        Statement::Select {
            columns,
            table,
            filters,
            order_by,
        } => {
            let virtual_table;
            let source = if table == "sys.tables" {
                virtual_table = sys_tables(db);
                &virtual_table
            } else {
                db.tables
                    .get(table)
                    .ok_or_else(|| format!("42S02!SELECT: no such table '{}'", table))?
            };

            let position = |name: &str| {
                source
                    .columns
                    .iter()
                    .position(|c| c.name == name)
                    .ok_or_else(|| format!("42000!SELECT: identifier '{}' unknown", name))
            };
            let projection = columns
                .iter()
                .map(|c| position(c))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let predicates = filters
                .iter()
                .map(|f| Ok((position(&f.column)?, f)))
                .collect::<std::result::Result<Vec<_>, String>>()?;

            let mut rows: Vec<&Vec<Cell>> = source
                .rows
                .iter()
                .filter(|row| {
                    predicates
                        .iter()
                        .all(|(i, f)| compare(&row[*i], f.op, &f.value))
                })
                .collect();
            if let Some(order) = order_by {
                let i = position(order)?;
                rows.sort_by(|a, b| {
                    a[i].as_f64()
                        .partial_cmp(&b[i].as_f64())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }

            let out_columns = projection.iter().map(|&i| source.columns[i].clone()).collect();
            let out_rows = rows
                .into_iter()
                .map(|row| projection.iter().map(|&i| row[i].clone()).collect())
                .collect();
            Ok(Outcome::Rows(out_columns, out_rows))
        }
        Statement::Begin | Statement::Commit | Statement::Rollback => {
            Err("42000!transaction control handled by the session".to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Server state and sessions

struct Shared {
    db: Database,
    statements: Vec<String>,
    connects: usize,
    fail_patterns: Vec<String>,
    page_size: usize,
    next_query_id: i64,
    delay: Option<Duration>,
}

/// Handle on the fake server. Clones share the same database.
#[derive(Clone)]
pub struct FakeMonet {
    shared: Arc<Mutex<Shared>>,
}

impl Default for FakeMonet {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMonet {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                db: Database::default(),
                statements: Vec::new(),
                connects: 0,
                fail_patterns: Vec::new(),
                page_size: 100,
                next_query_id: 0,
                delay: None,
            })),
        }
    }

    /// Rows sent with the first response of a query; the rest need `Xexport`.
    pub fn set_page_size(&self, rows: usize) {
        self.shared.lock().unwrap().page_size = rows.max(1);
    }

    /// Every statement containing `pattern` fails with a server error.
    pub fn fail_statements_containing(&self, pattern: &str) {
        self.shared
            .lock()
            .unwrap()
            .fail_patterns
            .push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.shared.lock().unwrap().fail_patterns.clear();
    }

    /// Delay every command by `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.shared.lock().unwrap().delay = delay;
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn statements(&self) -> Vec<String> {
        self.shared.lock().unwrap().statements.clone()
    }

    pub fn count_statements(&self, prefix: &str) -> usize {
        self.statements()
            .iter()
            .filter(|s| s.starts_with(prefix))
            .count()
    }

    pub fn connects(&self) -> usize {
        self.shared.lock().unwrap().connects
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.shared.lock().unwrap().db.tables.contains_key(name)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.shared
            .lock()
            .unwrap()
            .db
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Rows of `table` as plain strings, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Vec<String>> {
        self.shared
            .lock()
            .unwrap()
            .db
            .tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|row| row.iter().map(Cell::plain).collect())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run a statement outside any session, as another client would.
    pub fn execute(&self, sql: &str) -> std::result::Result<(), String> {
        let stmt = parse(sql)?;
        let mut shared = self.shared.lock().unwrap();
        execute(&mut shared.db, &stmt).map(|_| ())
    }
}

#[async_trait]
impl Connector for FakeMonet {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        self.shared.lock().unwrap().connects += 1;
        Ok(Box::new(FakeSession {
            shared: self.shared.clone(),
            txn: None,
            results: HashMap::new(),
        }))
    }
}

struct Txn {
    work: Database,
    ops: Vec<Statement>,
    aborted: bool,
}

struct PendingResult {
    column_count: usize,
    tuples: Vec<String>,
}

struct FakeSession {
    shared: Arc<Mutex<Shared>>,
    txn: Option<Txn>,
    results: HashMap<i64, PendingResult>,
}

fn error_line(message: &str) -> String {
    format!("!{}\n", message)
}

fn header_line(columns: &[Column], category: &str, field: impl Fn(&Column) -> String) -> String {
    let values: Vec<String> = columns.iter().map(field).collect();
    format!("% {} # {}\n", values.join(",\t"), category)
}

fn tuple_line(row: &[Cell]) -> String {
    let fields: Vec<String> = row.iter().map(Cell::render).collect();
    format!("[ {}\t]", fields.join(",\t"))
}

impl FakeSession {
    fn export(&mut self, args: &str) -> String {
        let mut parts = args.split_whitespace().map(|p| p.parse::<usize>());
        let (Some(Ok(query_id)), Some(Ok(offset)), Some(Ok(count))) =
            (parts.next(), parts.next(), parts.next())
        else {
            return error_line("42000!malformed Xexport");
        };
        let Some(result) = self.results.get(&(query_id as i64)) else {
            return error_line("HY000!no such query");
        };
        let end = (offset + count).min(result.tuples.len());
        let start = offset.min(end);
        let mut out = format!(
            "&6 {} {} {} {}\n",
            query_id,
            result.column_count,
            end - start,
            start
        );
        for tuple in &result.tuples[start..end] {
            out.push_str(tuple);
            out.push('\n');
        }
        out
    }

    fn run_sql(&mut self, sql: &str) -> String {
        let mut shared = self.shared.lock().unwrap();
        shared.statements.push(sql.to_string());

        if shared.fail_patterns.iter().any(|p| sql.contains(p.as_str())) {
            if let Some(txn) = self.txn.as_mut() {
                txn.aborted = true;
            }
            return error_line("42000!injected failure");
        }

        let stmt = match parse(sql) {
            Ok(stmt) => stmt,
            Err(e) => {
                if let Some(txn) = self.txn.as_mut() {
                    txn.aborted = true;
                }
                return error_line(&format!("42000!syntax error: {}", e));
            }
        };

        match stmt {
            Statement::Begin => {
                if self.txn.is_some() {
                    return error_line(
                        "25001!START TRANSACTION: cannot start a transaction within a transaction",
                    );
                }
                self.txn = Some(Txn {
                    work: shared.db.clone(),
                    ops: Vec::new(),
                    aborted: false,
                });
                "&4 f\n".to_string()
            }
            Statement::Commit => match self.txn.take() {
                None => error_line("2DM30!COMMIT: not allowed in auto commit mode"),
                Some(txn) if txn.aborted => {
                    error_line("40000!COMMIT: transaction is aborted, will ROLLBACK instead")
                }
                Some(txn) => {
                    for op in &txn.ops {
                        let _ = execute(&mut shared.db, op);
                    }
                    "&4 t\n".to_string()
                }
            },
            Statement::Rollback => match self.txn.take() {
                None => error_line("2DM30!ROLLBACK: not allowed in auto commit mode"),
                Some(_) => "&4 t\n".to_string(),
            },
            stmt => {
                let outcome = match self.txn.as_mut() {
                    Some(txn) if txn.aborted => {
                        return error_line("25005!current transaction is aborted (please ROLLBACK)")
                    }
                    Some(txn) => match execute(&mut txn.work, &stmt) {
                        Ok(outcome) => {
                            if !matches!(stmt, Statement::Select { .. }) {
                                txn.ops.push(stmt);
                            }
                            Ok(outcome)
                        }
                        Err(e) => {
                            txn.aborted = true;
                            Err(e)
                        }
                    },
                    None => execute(&mut shared.db, &stmt),
                };

                match outcome {
                    Err(e) => error_line(&e),
                    Ok(Outcome::Schema) => "&3\n".to_string(),
                    Ok(Outcome::Update(n)) => format!("&2 {} -1\n", n),
                    Ok(Outcome::Rows(columns, rows)) => {
                        shared.next_query_id += 1;
                        let query_id = shared.next_query_id;
                        let page = shared.page_size;
                        drop(shared);
                        self.table_response(query_id, page, &columns, &rows)
                    }
                }
            }
        }
    }

    fn table_response(
        &mut self,
        query_id: i64,
        page: usize,
        columns: &[Column],
        rows: &[Vec<Cell>],
    ) -> String {
        let first = rows.len().min(page);
        let mut out = format!(
            "&1 {} {} {} {}\n",
            query_id,
            rows.len(),
            columns.len(),
            first
        );
        out.push_str(&header_line(columns, "table_name", |_| "t".to_string()));
        out.push_str(&header_line(columns, "name", |c| c.name.clone()));
        out.push_str(&header_line(columns, "type", |c| c.ty.wire_name().to_string()));
        out.push_str(&header_line(columns, "length", |c| match c.ty {
            ColType::Varchar(w) => w.to_string(),
            _ => "8".to_string(),
        }));

        let tuples: Vec<String> = rows.iter().map(|r| tuple_line(r)).collect();
        for tuple in &tuples[..first] {
            out.push_str(tuple);
            out.push('\n');
        }
        if first < rows.len() {
            self.results.insert(
                query_id,
                PendingResult {
                    column_count: columns.len(),
                    tuples,
                },
            );
        }
        out
    }
}

#[async_trait]
impl Transport for FakeSession {
    async fn cmd(&mut self, command: &str) -> Result<String> {
        let delay = self.shared.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(args) = command.strip_prefix("Xexport ") {
            return Ok(self.export(args));
        }
        if let Some(id) = command.strip_prefix("Xclose ") {
            if let Ok(id) = id.trim().parse::<i64>() {
                self.results.remove(&id);
            }
            return Ok(String::new());
        }

        let sql = command
            .strip_prefix('s')
            .and_then(|s| s.strip_suffix("\n;"))
            .ok_or_else(|| Error::Protocol(format!("unexpected command {:?}", command)))?;
        Ok(self.run_sql(sql))
    }
}

// ---------------------------------------------------------------------------
// Request builders

pub fn series(labels: &[(&str, &str)], samples: &[(i64, f64)]) -> TimeSeries {
    TimeSeries {
        labels: labels.iter().map(|(k, v)| Label::new(*k, *v)).collect(),
        samples: samples
            .iter()
            .map(|(timestamp, value)| Sample {
                value: *value,
                timestamp: *timestamp,
            })
            .collect(),
    }
}

pub fn write_request(timeseries: Vec<TimeSeries>) -> WriteRequest {
    WriteRequest { timeseries }
}

pub fn query(metric: &str, matchers: &[(MatchType, &str, &str)], start: i64, end: i64) -> Query {
    let mut all = vec![LabelMatcher::new(MatchType::Eq, METRIC_NAME_LABEL, metric)];
    all.extend(
        matchers
            .iter()
            .map(|(kind, name, value)| LabelMatcher::new(*kind, *name, *value)),
    );
    Query {
        start_timestamp_ms: start,
        end_timestamp_ms: end,
        matchers: all,
    }
}

pub fn read_request(queries: Vec<Query>) -> ReadRequest {
    ReadRequest { queries }
}

/// Label pairs of a series as owned tuples, for comparisons.
pub fn label_pairs(series: &TimeSeries) -> Vec<(String, String)> {
    series
        .labels
        .iter()
        .map(|l| (l.name.clone(), l.value.clone()))
        .collect()
}

pub fn pairs(labels: &[(&str, &str)]) -> Vec<(String, String)> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn test_config(whitelist: &[&str]) -> AdapterConfig {
    AdapterConfig {
        pool: PoolConfig {
            max_open: 8,
            max_idle: 4,
            reply_size: 100,
        },
        whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
        allow_prefix: Some("monetdb".to_string()),
        refresh_interval: Duration::from_secs(3600),
        pool_stats_interval: Duration::from_secs(3600),
        request_timeout: Duration::from_secs(10),
    }
}

pub async fn start_adapter(fake: &FakeMonet, whitelist: &[&str]) -> Adapter {
    Adapter::start(test_config(whitelist), fake.connector())
        .await
        .expect("adapter starts against fake server")
}
