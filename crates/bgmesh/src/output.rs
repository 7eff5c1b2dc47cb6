use std::io::IsTerminal;

use bgmesh_client::{Completed, Conclusion, Delivery, RequestFailure};
use bgmesh_registry::{Entry, Record, Value};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use data_encoding::HEXLOWER;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EnvelopeOutput<'a> {
    name: &'a str,
    kind: &'a str,
    opcode: String,
    size: usize,
    hex: &'a str,
}

#[derive(Serialize)]
struct EntryOutput<'a> {
    kind: &'a str,
    opcode: String,
    name: &'a str,
    family: &'a str,
    role: &'a str,
    min_size: usize,
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn value_text(value: &Value) -> String {
    match value {
        Value::U8(v) => v.to_string(),
        Value::I8(v) => v.to_string(),
        Value::U16(v) => v.to_string(),
        Value::I16(v) => v.to_string(),
        Value::U32(v) => v.to_string(),
        Value::I32(v) => v.to_string(),
        Value::Fixed(bytes) | Value::Bytes(bytes) => HEXLOWER.encode(bytes),
        Value::Elements(items) => format!(
            "[{}]",
            items
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",")
        ),
    }
}

fn fields_inline(record: &Record) -> String {
    record
        .fields
        .iter()
        .map(|(name, value)| format!("{name}={}", value_text(value)))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn print_record(record: &Record, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Table => {
            println!("{} {} {}", record.kind, record.name, record.opcode);
            let mut table = new_table(vec!["FIELD", "VALUE"]);
            for (name, value) in &record.fields {
                table.add_row(vec![name.clone(), value_text(value)]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line = format!(
                "{} {} {} {}",
                record.kind,
                record.name,
                record.opcode,
                fields_inline(record)
            );
            println!("{}", line.trim_end());
        }
    }
}

pub fn print_envelope(record: &Record, hex: &str, size: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&EnvelopeOutput {
            name: &record.name,
            kind: record.kind.as_str(),
            opcode: record.opcode.to_string(),
            size,
            hex,
        }),
        OutputFormat::Table | OutputFormat::Pretty => println!("{hex}"),
    }
}

pub fn print_entries(entries: &[&Entry], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<EntryOutput<'_>> = entries
                .iter()
                .map(|entry| EntryOutput {
                    kind: entry.kind.as_str(),
                    opcode: entry.opcode.to_string(),
                    name: &entry.name,
                    family: &entry.family,
                    role: entry.role.as_str(),
                    min_size: entry.descriptor.min_len(),
                })
                .collect();
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["KIND", "OPCODE", "NAME", "FAMILY", "ROLE", "MIN"]);
            for entry in entries {
                table.add_row(vec![
                    entry.kind.to_string(),
                    entry.opcode.to_string(),
                    entry.name.clone(),
                    entry.family.clone(),
                    entry.role.as_str().to_string(),
                    entry.descriptor.min_len().to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for entry in entries {
                println!(
                    "{} {} {} family={} role={}",
                    entry.kind,
                    entry.opcode,
                    entry.name,
                    entry.family,
                    entry.role.as_str()
                );
            }
        }
    }
}

pub fn print_delivery(delivery: &Delivery, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(delivery),
        OutputFormat::Table => {
            let (kind, name, opcode, detail) = delivery_columns(delivery);
            let mut table = new_table(vec!["DELIVERY", "NAME", "OPCODE", "DETAIL"]);
            table.add_row(vec![kind.to_string(), name, opcode, detail]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let (kind, name, opcode, detail) = delivery_columns(delivery);
            println!("{kind} {name} {opcode} {detail}");
        }
    }
}

fn delivery_columns(delivery: &Delivery) -> (&'static str, String, String, String) {
    match delivery {
        Delivery::Event(record) => (
            "event",
            record.name.clone(),
            record.opcode.to_string(),
            fields_inline(record),
        ),
        Delivery::Message(record) => (
            "message",
            record.name.clone(),
            record.opcode.to_string(),
            fields_inline(record),
        ),
        Delivery::Concluded(conclusion) => (
            "concluded",
            conclusion.family.clone(),
            conclusion.request.opcode.to_string(),
            conclusion_detail(conclusion),
        ),
        Delivery::Diagnostic(diagnostic) => (
            "diagnostic",
            String::new(),
            String::new(),
            diagnostic.to_string(),
        ),
    }
}

fn conclusion_detail(conclusion: &Conclusion) -> String {
    let handle = conclusion.handle;
    match &conclusion.outcome {
        Ok(Completed::Status(status)) => {
            format!("handle={handle} status {}", fields_inline(status))
        }
        Ok(Completed::List(list)) => {
            let elements = list.elements();
            let data = list.data();
            let mut detail = format!("handle={handle} items={}", list.items.len());
            if !elements.is_empty() {
                detail.push_str(&format!(
                    " elements={}",
                    value_text(&Value::Elements(elements))
                ));
            }
            if !data.is_empty() {
                detail.push_str(&format!(" data={}", HEXLOWER.encode(&data)));
            }
            detail
        }
        Err(RequestFailure::Stack { result, .. }) => {
            format!("handle={handle} failed result={result:#06x}")
        }
        Err(RequestFailure::Timeout { after }) => {
            format!("handle={handle} timed out after {after:?}")
        }
    }
}
