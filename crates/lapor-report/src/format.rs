//! Message text for the treasurer group.

use chrono::{DateTime, FixedOffset, NaiveDate};
use lapor_core::error::{LaporError, Result};
use lapor_core::types::UpdateKind;

use crate::row::LedgerRow;

pub const TEST_MESSAGE: &str = "🧪 *TEST NOTIFICATION*\nDugedagedigedu";

const ERROR_HEADER: &str = "⚠️ *ERROR NOTIFICATION*";

/// Rupiah amount with dots as thousand separators, rounded to whole units.
pub fn format_money(amount: f64) -> String {
    let rounded = amount.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

/// `dd/MM/yyyy` in the sheet's timezone. Unparseable text is shown as-is.
pub fn format_date(raw: &str, utc_offset_hours: i32) -> String {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw)
        && let Some(offset) = FixedOffset::east_opt(utc_offset_hours * 3600)
    {
        return ts.with_timezone(&offset).format("%d/%m/%Y").to_string();
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.format("%d/%m/%Y").to_string();
    }
    raw.to_string()
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or("")
}

/// Notification for one ledger row.
///
/// Fails when the note is not of the form `label: value`.
pub fn financial_message(
    row: &LedgerRow,
    kind: UpdateKind,
    utc_offset_hours: i32,
) -> Result<String> {
    let money_in = row.is_money_in();
    let money_out = row.is_money_out();

    let mut message = String::new();
    if kind == UpdateKind::New {
        let mut sep = String::new();
        if money_in {
            sep.push('💰');
        }
        if money_out {
            sep.push('📤');
        }
        message.push_str(&format!("{sep} *LAPORAN BENDAHARA* {sep}\n"));
    } else {
        message.push_str("🔄 *UPDATE LAPORAN BENDAHARA* 🔄\n");
    }

    let direction = if money_in { "*UANG MASUK*" } else { "*UANG KELUAR*" };
    message.push_str(&format!("\nNo: {}\n", text(&row.no)));
    message.push_str(&format!(
        "Tanggal: {} {}\n",
        format_date(text(&row.date), utc_offset_hours),
        text(&row.time)
    ));
    message.push_str(&format!("Keterangan: {direction}\n"));

    let description = text(&row.description);
    let remark = text(&row.remark);
    if !description.is_empty() || !remark.is_empty() {
        if remark.is_empty() {
            message.push_str(&format!("\nCatatan: *{description}*\n"));
        } else {
            message.push_str(&format!("\nCatatan: *{description} ({remark})*\n"));
        }
    }

    if let Some(amount) = row.money_in.filter(|v| *v > 0.0) {
        message.push_str(&format!("Nominal: *Rp{}*\n", format_money(amount)));
    }
    if let Some(amount) = row.money_out.filter(|v| *v > 0.0) {
        message.push_str(&format!("Nominal: *Rp{}*\n", format_money(amount)));
    }

    let note = text(&row.note);
    if !note.is_empty() {
        let (label, value) = note.split_once(':').ok_or_else(|| {
            LaporError::Report(format!("Catatan \"{note}\" is not `label: value`"))
        })?;
        message.push_str(&format!("{}: *{}*\n", label.trim_end(), value.trim()));
    }

    message.push_str(&format!(
        "\n💼 Saldo terkini: *Rp{}*",
        format_money(row.balance.unwrap_or(0.0))
    ));
    Ok(message)
}

pub fn error_message(reason: &str) -> String {
    format!("{ERROR_HEADER}\n{reason}")
}

/// Totals across `rows`; the balance is the last row that has one.
pub fn summary_message(rows: &[LedgerRow]) -> String {
    let total_in: f64 = rows.iter().filter_map(|r| r.money_in).sum();
    let total_out: f64 = rows.iter().filter_map(|r| r.money_out).sum();
    let balance = rows.iter().rev().find_map(|r| r.balance).unwrap_or(0.0);

    format!(
        "📊 *RINGKASAN KEUANGAN*\n───\nTotal Pemasukan: *Rp{}*\nTotal Pengeluaran: *Rp{}*\n\nSaldo Terkini: *Rp{}*\n───\n",
        format_money(total_in),
        format_money(total_out),
        format_money(balance)
    )
}
