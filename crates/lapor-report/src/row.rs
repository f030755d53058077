//! Ledger rows and the edit events that carry them.

use serde::{Deserialize, Serialize};

/// One row of the treasurer's ledger sheet.
///
/// Columns: 1 No, 2 Tanggal, 3 Jam, 4 Uraian, 5 Uang Masuk, 6 Uang Keluar,
/// 7 Saldo, 8 Keterangan, 9 Catatan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    #[serde(default)]
    pub no: Option<String>,
    /// RFC 3339 timestamp, `YYYY-MM-DD`, or text shown as-is.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub money_in: Option<f64>,
    #[serde(default)]
    pub money_out: Option<f64>,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub remark: Option<String>,
    /// `label: value`, e.g. `Dibayar oleh: Bu Sari`.
    #[serde(default)]
    pub note: Option<String>,
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn nonzero(value: Option<f64>) -> bool {
    value.is_some_and(|v| v != 0.0)
}

impl LedgerRow {
    /// Every required column is filled and money moved one way or the other.
    /// A zero balance counts as filled.
    pub fn is_complete(&self) -> bool {
        filled(&self.no)
            && filled(&self.date)
            && filled(&self.time)
            && filled(&self.description)
            && self.balance.is_some()
            && filled(&self.note)
            && (nonzero(self.money_in) || nonzero(self.money_out))
    }

    pub fn is_money_in(&self) -> bool {
        self.money_in.is_some_and(|v| v > 0.0)
    }

    pub fn is_money_out(&self) -> bool {
        self.money_out.is_some_and(|v| v > 0.0)
    }
}

/// A sheet edit as pushed by the spreadsheet hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditEvent {
    pub sheet: String,
    /// 1-based row of the top-left edited cell.
    pub row: u32,
    /// 1-based column of the top-left edited cell.
    pub column: u32,
    #[serde(default = "default_span")]
    pub num_rows: u32,
    #[serde(default = "default_span")]
    pub num_columns: u32,
    /// Current contents of the edited row.
    #[serde(default)]
    pub values: LedgerRow,
}

fn default_span() -> u32 {
    1
}

impl EditEvent {
    pub fn is_single_cell(&self) -> bool {
        self.num_rows == 1 && self.num_columns == 1
    }
}
