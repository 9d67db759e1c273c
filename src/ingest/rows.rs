//! Row-level parsing of position and transaction CSVs.
//!
//! Headers are matched case-insensitively. A row that fails validation is
//! skipped with a recorded warning; ingestion of the rest of the file always
//! continues.

use chrono::{DateTime, NaiveDate, Utc};
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::Warning;
use crate::models::{AssetType, Transaction};

/// A validated position row, before reconciliation.
#[derive(Debug, Clone)]
pub struct PositionRow {
    pub symbol: String,
    pub name: String,
    pub asset_type: AssetType,
    pub quantity: Decimal,
    pub avg_buy_price: Decimal,
    pub currency: String,
    pub broker: String,
    pub manual_type: bool,
    /// The export already knows this symbol failed mapping; the reconciler
    /// resolves it through explicit overrides only.
    pub unmapped_hint: bool,
    /// Carried from the export as a fallback when no quote is available yet.
    pub current_price: Option<Decimal>,
    pub last_price_update: Option<DateTime<Utc>>,
}

/// Rows that parsed plus warnings for the ones that did not.
#[derive(Debug)]
pub struct ParsedRows<T> {
    pub rows: Vec<T>,
    pub warnings: Vec<Warning>,
}

// Derived `Default` would demand `T: Default`; an empty result needs no such
// bound.
impl<T> Default for ParsedRows<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

fn header_index(headers: &csv::StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().trim_matches('"').to_lowercase(), i))
        .collect()
}

fn field<'r>(record: &'r csv::StringRecord, idx: &HashMap<String, usize>, name: &str) -> Option<&'r str> {
    idx.get(name)
        .and_then(|&i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Lenient decimal parsing for broker exports: tolerates currency suffixes,
/// embedded spaces, and grouped forms in both conventions ("1.234,56",
/// "1234,56", "1,234.56").
pub(crate) fn parse_decimal_lenient(raw: &str) -> Option<Decimal> {
    let mut value = raw.trim().to_string();
    for code in ["EUR", "USD", "GBP", "PLN"] {
        value = value.replace(code, "");
    }
    value.retain(|c| c != ' ' && c != '\u{a0}');
    if value.is_empty() {
        return None;
    }
    if let Some(comma) = value.rfind(',') {
        match value.rfind('.') {
            // "1,234.56": dot is the decimal separator, commas group.
            Some(dot) if dot > comma => value.retain(|c| c != ','),
            _ => {
                // "1.234,56" / "1234,56": comma is the decimal separator.
                value.retain(|c| c != '.');
                value = value.replace(',', ".");
            }
        }
    }
    Decimal::from_str(&value).ok()
}

/// Dates arrive as ISO dates, ISO timestamps, or day-first European forms.
pub(crate) fn parse_date_lenient(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text.replace(' ', "T").as_str()) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%d-%m-%Y %H:%M", "%d-%m-%Y"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.date());
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Some(date);
        }
    }
    None
}

fn parse_bool(raw: Option<&str>) -> bool {
    raw.map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// Parse a normalized position CSV. `default_broker` fills rows without a
/// broker column, `base_currency` fills rows without a currency.
pub fn parse_positions(
    content: &str,
    file_label: &str,
    default_broker: &str,
    base_currency: &str,
) -> ParsedRows<PositionRow> {
    let mut out = ParsedRows::default();
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let idx = match reader.headers() {
        Ok(headers) => header_index(headers),
        Err(e) => {
            out.warnings
                .push(Warning::parse(file_label, 0, format!("unreadable header: {e}")));
            return out;
        }
    };

    for (i, record) in reader.records().enumerate() {
        let line = (i + 2) as u64;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                out.warnings
                    .push(Warning::parse(file_label, line, e.to_string()));
                continue;
            }
        };

        let Some(symbol) = field(&record, &idx, "symbol") else {
            out.warnings
                .push(Warning::parse(file_label, line, "missing symbol"));
            continue;
        };
        let symbol = symbol.replace('$', "").trim().to_uppercase();
        if symbol.is_empty() {
            out.warnings
                .push(Warning::parse(file_label, line, "missing symbol"));
            continue;
        }

        let quantity = match field(&record, &idx, "quantity").map(parse_decimal_lenient) {
            Some(Some(q)) if q > Decimal::ZERO => q,
            Some(Some(_)) => {
                out.warnings.push(Warning::parse(
                    file_label,
                    line,
                    format!("{symbol}: quantity must be strictly positive"),
                ));
                continue;
            }
            _ => {
                out.warnings.push(Warning::parse(
                    file_label,
                    line,
                    format!("{symbol}: missing or unparsable quantity"),
                ));
                continue;
            }
        };

        let avg_buy_price = match field(&record, &idx, "avg_buy_price").map(parse_decimal_lenient) {
            Some(Some(p)) if p >= Decimal::ZERO => p,
            Some(Some(_)) => {
                out.warnings.push(Warning::parse(
                    file_label,
                    line,
                    format!("{symbol}: negative avg_buy_price"),
                ));
                continue;
            }
            _ => {
                out.warnings.push(Warning::parse(
                    file_label,
                    line,
                    format!("{symbol}: missing or unparsable avg_buy_price"),
                ));
                continue;
            }
        };

        let asset_type = match field(&record, &idx, "type") {
            Some(raw) => match AssetType::parse(raw) {
                Some(t) => t,
                None => {
                    out.warnings.push(Warning::parse(
                        file_label,
                        line,
                        format!("{symbol}: unknown asset type '{raw}'"),
                    ));
                    continue;
                }
            },
            None => AssetType::Equity,
        };

        let current_price = field(&record, &idx, "current_price")
            .and_then(parse_decimal_lenient)
            .filter(|p| *p >= Decimal::ZERO);

        out.rows.push(PositionRow {
            name: field(&record, &idx, "name")
                .map(str::to_string)
                .unwrap_or_else(|| symbol.clone()),
            asset_type,
            quantity,
            avg_buy_price,
            currency: field(&record, &idx, "currency")
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| base_currency.to_string()),
            broker: field(&record, &idx, "broker")
                .unwrap_or(default_broker)
                .trim()
                .to_lowercase(),
            manual_type: parse_bool(field(&record, &idx, "manual_type")),
            unmapped_hint: parse_bool(field(&record, &idx, "unmapped")),
            current_price,
            last_price_update: field(&record, &idx, "last_price_update")
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            symbol,
        });
    }

    out
}

/// Parse a normalized transaction CSV for one broker. Quantity is signed;
/// an optional `type` column (BUY/SELL) corrects the sign when present.
/// Degiro's Dutch-header account exports are recognized and handled too.
pub fn parse_transactions(
    content: &str,
    file_label: &str,
    default_broker: &str,
) -> ParsedRows<Transaction> {
    let mut out = ParsedRows::default();
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let idx = match reader.headers() {
        Ok(headers) => header_index(headers),
        Err(e) => {
            out.warnings
                .push(Warning::parse(file_label, 0, format!("unreadable header: {e}")));
            return out;
        }
    };

    if idx.contains_key("datum") && idx.contains_key("product") && idx.contains_key("aantal") {
        parse_degiro_records(&mut reader, &idx, file_label, default_broker, &mut out);
        return out;
    }

    for (i, record) in reader.records().enumerate() {
        let line = (i + 2) as u64;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                out.warnings
                    .push(Warning::parse(file_label, line, e.to_string()));
                continue;
            }
        };

        // Revolut-style exports call the symbol column "ticker".
        let Some(symbol) = field(&record, &idx, "symbol").or_else(|| field(&record, &idx, "ticker"))
        else {
            out.warnings
                .push(Warning::parse(file_label, line, "missing symbol"));
            continue;
        };
        let symbol = symbol.to_uppercase();

        let Some(date) = field(&record, &idx, "date").and_then(parse_date_lenient) else {
            out.warnings.push(Warning::parse(
                file_label,
                line,
                format!("{symbol}: missing or unparsable date"),
            ));
            continue;
        };

        let Some(mut quantity) = field(&record, &idx, "quantity").and_then(parse_decimal_lenient)
        else {
            out.warnings.push(Warning::parse(
                file_label,
                line,
                format!("{symbol}: missing or unparsable quantity"),
            ));
            continue;
        };
        if quantity == Decimal::ZERO {
            out.warnings.push(Warning::parse(
                file_label,
                line,
                format!("{symbol}: zero-quantity transaction"),
            ));
            continue;
        }

        let price = match field(&record, &idx, "price")
            .or_else(|| field(&record, &idx, "price per share"))
            .and_then(parse_decimal_lenient)
        {
            Some(p) if p >= Decimal::ZERO => p,
            Some(_) => {
                out.warnings.push(Warning::parse(
                    file_label,
                    line,
                    format!("{symbol}: negative price"),
                ));
                continue;
            }
            None => {
                out.warnings.push(Warning::parse(
                    file_label,
                    line,
                    format!("{symbol}: missing or unparsable price"),
                ));
                continue;
            }
        };

        if let Some(side) = field(&record, &idx, "type") {
            let side = side.to_uppercase();
            if side.contains("SELL") {
                quantity = -quantity.abs();
            } else if side.contains("BUY") {
                quantity = quantity.abs();
            }
        }

        let currency = field(&record, &idx, "currency")
            .map(|c| c.to_uppercase())
            .unwrap_or_default();
        let broker = field(&record, &idx, "broker").unwrap_or(default_broker);

        out.rows
            .push(Transaction::new(broker, symbol, date, quantity, price, currency));
    }

    out
}

/// Degiro account exports: Dutch `Datum`/`Product`/`Aantal`/`Koers` headers,
/// the symbol in `ISIN`, and the trade currency in the header-less column
/// right after `Lokale waarde`. `Aantal` is already signed on sells.
fn parse_degiro_records(
    reader: &mut csv::Reader<&[u8]>,
    idx: &HashMap<String, usize>,
    file_label: &str,
    default_broker: &str,
    out: &mut ParsedRows<Transaction>,
) {
    for (i, record) in reader.records().enumerate() {
        let line = (i + 2) as u64;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                out.warnings
                    .push(Warning::parse(file_label, line, e.to_string()));
                continue;
            }
        };

        let Some(symbol) = field(&record, idx, "isin").or_else(|| field(&record, idx, "product"))
        else {
            out.warnings
                .push(Warning::parse(file_label, line, "missing ISIN and product"));
            continue;
        };
        let symbol = symbol.to_uppercase();

        let Some(date) = field(&record, idx, "datum").and_then(parse_date_lenient) else {
            out.warnings.push(Warning::parse(
                file_label,
                line,
                format!("{symbol}: missing or unparsable date"),
            ));
            continue;
        };

        let Some(quantity) = field(&record, idx, "aantal").and_then(parse_decimal_lenient) else {
            out.warnings.push(Warning::parse(
                file_label,
                line,
                format!("{symbol}: missing or unparsable quantity"),
            ));
            continue;
        };
        if quantity == Decimal::ZERO {
            out.warnings.push(Warning::parse(
                file_label,
                line,
                format!("{symbol}: zero-quantity transaction"),
            ));
            continue;
        }

        let Some(price) = field(&record, idx, "koers").and_then(parse_decimal_lenient) else {
            out.warnings.push(Warning::parse(
                file_label,
                line,
                format!("{symbol}: missing or unparsable price"),
            ));
            continue;
        };

        let currency = idx
            .get("lokale waarde")
            .and_then(|&i| record.get(i + 1))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase)
            .unwrap_or_else(|| "EUR".to_string());

        out.rows.push(Transaction::new(
            default_broker,
            symbol,
            date,
            quantity,
            price,
            currency,
        ));
    }
}
