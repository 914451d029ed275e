//! Console formatting of values, as produced by auto-printing and `print()`.

use super::ast::deparse;
use super::value::{List, Value};

const WIDTH: usize = 80;

fn trim_zeros(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

/// Formats a double with up to seven significant digits.
pub fn format_double(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Inf".into() } else { "-Inf".into() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }
    let abs = n.abs();
    if abs < 1e-4 || abs >= 1e15 {
        let s = format!("{:.6e}", n);
        let (mantissa, exponent) = s.split_once('e').unwrap_or((s.as_str(), "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        return format!(
            "{}e{}{:02}",
            trim_zeros(mantissa),
            if exponent < 0 { "-" } else { "+" },
            exponent.abs()
        );
    }
    let magnitude = abs.log10().floor() as i32;
    let decimals = (6 - magnitude).max(0) as usize;
    trim_zeros(&format!("{:.*}", decimals, n))
}

/// Formats a numeric vector with a shared number of decimals.
fn format_doubles(values: &[f64]) -> Vec<String> {
    let formatted: Vec<String> = values.iter().map(|n| format_double(*n)).collect();
    if formatted.iter().any(|s| s.contains('e')) {
        return formatted;
    }
    let decimals = formatted
        .iter()
        .filter_map(|s| s.split_once('.').map(|(_, d)| d.len()))
        .max()
        .unwrap_or(0);
    if decimals == 0 {
        return formatted;
    }
    values
        .iter()
        .zip(formatted)
        .map(|(n, s)| if n.is_finite() { format!("{:.*}", decimals, n) } else { s })
        .collect()
}

fn quote(s: &str) -> String {
    format!("{:?}", s)
}

fn print_vector(items: &[String], left_align: bool, out: &mut String) {
    let width = items.iter().map(|s| s.chars().count()).max().unwrap_or(0);
    let label_width = format!("[{}]", items.len()).len();
    let per_line = ((WIDTH - label_width) / (width + 1)).max(1);
    for (i, chunk) in items.chunks(per_line).enumerate() {
        let label = format!("[{}]", i * per_line + 1);
        out.push_str(&format!("{:>w$}", label, w = label_width));
        for item in chunk {
            if left_align {
                out.push_str(&format!(" {:<w$}", item, w = width));
            } else {
                out.push_str(&format!(" {:>w$}", item, w = width));
            }
        }
        let trimmed = out.trim_end_matches(' ').len();
        out.truncate(trimmed);
        out.push('\n');
    }
}

fn cell_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Double(v) => format_doubles(v),
        Value::Character(v) => v.clone(),
        other => other.as_strings().unwrap_or_default(),
    }
}

fn print_data_frame(list: &List, out: &mut String) {
    let names = list.names.clone().unwrap_or_default();
    let rows = list.rows();
    if list.values.is_empty() {
        out.push_str("data frame with 0 columns and 0 rows\n");
        return;
    }
    if rows == 0 {
        out.push_str(&format!("[1] {}\n<0 rows> (or 0-length row.names)\n", names.join(" ")));
        return;
    }
    let columns: Vec<Vec<String>> = list.values.iter().map(cell_strings).collect();
    let row_width = rows.to_string().len();
    let widths: Vec<usize> = columns
        .iter()
        .zip(&names)
        .map(|(cells, name)| {
            cells.iter().map(|c| c.chars().count()).max().unwrap_or(0).max(name.chars().count())
        })
        .collect();

    out.push_str(&" ".repeat(row_width));
    for (name, width) in names.iter().zip(&widths) {
        out.push_str(&format!(" {:>w$}", name, w = width));
    }
    out.push('\n');
    for row in 0..rows {
        out.push_str(&format!("{:<w$}", row + 1, w = row_width));
        for (cells, width) in columns.iter().zip(&widths) {
            let cell = cells.get(row).map(String::as_str).unwrap_or("");
            out.push_str(&format!(" {:>w$}", cell, w = width));
        }
        out.push('\n');
    }
}

fn print_list(list: &List, prefix: &str, out: &mut String) {
    if list.values.is_empty() {
        out.push_str(if list.names.is_some() { "named list()\n" } else { "list()\n" });
        return;
    }
    for (i, value) in list.values.iter().enumerate() {
        let tag = match list.names.as_ref().and_then(|n| n.get(i)).filter(|n| !n.is_empty()) {
            Some(name) => format!("{}${}", prefix, name),
            None => format!("{}[[{}]]", prefix, i + 1),
        };
        out.push_str(&tag);
        out.push('\n');
        match value {
            Value::List(inner) if !inner.is_data_frame() => print_list(inner, &tag, out),
            other => format_into(other, out),
        }
        out.push('\n');
    }
}

fn format_into(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("NULL\n"),
        Value::Logical(v) if v.is_empty() => out.push_str("logical(0)\n"),
        Value::Double(v) if v.is_empty() => out.push_str("numeric(0)\n"),
        Value::Character(v) if v.is_empty() => out.push_str("character(0)\n"),
        Value::Logical(v) => {
            let items: Vec<String> =
                v.iter().map(|b| if *b { "TRUE".into() } else { "FALSE".into() }).collect();
            print_vector(&items, false, out);
        }
        Value::Double(v) => print_vector(&format_doubles(v), false, out),
        Value::Character(v) => {
            let items: Vec<String> = v.iter().map(|s| quote(s)).collect();
            print_vector(&items, true, out);
        }
        Value::List(list) if list.is_data_frame() => print_data_frame(list, out),
        Value::List(list) => print_list(list, "", out),
        Value::Closure(closure) => {
            let expr = super::ast::Expr::Function {
                params: closure.params.clone(),
                body: closure.body.clone(),
            };
            out.push_str(&deparse(&expr));
            out.push('\n');
        }
        Value::Builtin(name) => out.push_str(&format!("function (...) .Primitive(\"{}\")\n", name)),
        Value::Env(_) => out.push_str("<environment>\n"),
        Value::Html(html) => {
            out.push_str(&html.html);
            out.push('\n');
        }
        Value::Plot(_) => out.push_str("<recordedplot>\n"),
    }
}

/// Text printed for a value at the console.
pub fn format_value(value: &Value) -> String {
    let mut out = String::new();
    format_into(value, &mut out);
    out
}
