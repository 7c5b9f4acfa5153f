use super::ui;
use crate::core::model::{CapitalSnapshot, UserId};
use crate::core::{CapitalGrowth, CapitalReport, CapitalSnapshotService};
use anyhow::Result;
use chrono::NaiveDate;
use comfy_table::Cell;

impl CapitalReport {
    pub fn display_as_table(&self, title: &str) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![ui::header_cell("Currency"), ui::header_cell("Total")]);
        for (currency, total) in &self.totals {
            table.add_row(vec![Cell::new(currency), ui::total_cell(*total)]);
        }

        let mut output = format!("{}\n\n", ui::style_text(title, ui::StyleType::Title));
        output.push_str(&table.to_string());

        if !self.skipped.is_empty() {
            output.push_str(&format!(
                "\n\n{}",
                ui::style_text("Not included:", ui::StyleType::Warning)
            ));
            for skipped in &self.skipped {
                let what = match &skipped.category {
                    Some(category) => format!("{} ({category})", skipped.currency),
                    None => skipped.currency.clone(),
                };
                output.push_str(&format!(
                    "\n  {what} in {}: {}",
                    skipped.target,
                    ui::style_text(&skipped.reason.to_string(), ui::StyleType::Subtle)
                ));
            }
        }
        output
    }
}

impl CapitalGrowth {
    pub fn display_as_table(&self) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("From"),
            ui::header_cell("To"),
            ui::header_cell("Start (USD)"),
            ui::header_cell("End (USD)"),
            ui::header_cell("Growth (USD)"),
            ui::header_cell("Growth (%)"),
            ui::header_cell("Days"),
        ]);
        table.add_row(vec![
            Cell::new(self.start_date),
            Cell::new(self.end_date),
            ui::amount_cell(self.start_usd),
            ui::amount_cell(self.end_usd),
            ui::amount_cell(self.absolute_usd),
            ui::change_cell(self.relative_percent),
            Cell::new(self.period_days),
        ]);
        table.to_string()
    }
}

pub fn snapshots_table(snapshots: &[CapitalSnapshot]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Total (USD)"),
        ui::header_cell("Total (RUB)"),
    ]);
    for snapshot in snapshots {
        table.add_row(vec![
            Cell::new(snapshot.snapshot_date),
            ui::amount_cell(snapshot.total_in_usd),
            ui::amount_cell(snapshot.total_in_rub),
        ]);
    }
    table.to_string()
}

pub async fn run(
    service: &CapitalSnapshotService,
    user: UserId,
    as_of: Option<NaiveDate>,
    currencies: &[String],
) -> Result<()> {
    let pb = ui::new_spinner("Valuing assets...");
    let (report, title) = match as_of {
        Some(date) => (
            service.capital_as_of(user, date, currencies).await,
            format!("Capital as of {date}"),
        ),
        None => (
            service.current_capital(user, currencies).await,
            "Current capital".to_string(),
        ),
    };
    pb.finish_and_clear();

    println!("{}", report?.display_as_table(&title));
    Ok(())
}

pub async fn growth(
    service: &CapitalSnapshotService,
    user: UserId,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<()> {
    if to < from {
        anyhow::bail!("End date {to} is before start date {from}");
    }
    let pb = ui::new_spinner("Valuing assets...");
    let growth = service.capital_growth(user, from, to).await;
    pb.finish_and_clear();

    println!("{}", growth?.display_as_table());
    Ok(())
}

pub async fn list_snapshots(service: &CapitalSnapshotService, user: UserId, limit: usize) -> Result<()> {
    let snapshots = service.recent_snapshots(user, limit).await?;
    if snapshots.is_empty() {
        println!("No snapshots stored for user {user}.");
        return Ok(());
    }
    println!("{}", snapshots_table(&snapshots));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SkippedAsset, ValuationError};
    use std::collections::BTreeMap;

    #[test]
    fn test_report_table_lists_totals_and_skipped() {
        let report = CapitalReport {
            totals: BTreeMap::from([("USD".to_string(), 22.0), ("RUB".to_string(), 1833.33)]),
            skipped: vec![SkippedAsset {
                currency: "SBER".to_string(),
                category: Some("Broker".to_string()),
                target: "USD".to_string(),
                reason: ValuationError::UnsupportedCurrency("SBER".to_string()),
            }],
        };

        let output = report.display_as_table("Current capital");
        assert!(output.contains("22.00"));
        assert!(output.contains("1833.33"));
        assert!(output.contains("SBER (Broker) in USD"));
        assert!(output.contains("Unsupported currency: SBER"));
    }

    #[test]
    fn test_snapshots_table() {
        let output = snapshots_table(&[CapitalSnapshot {
            user_id: 1,
            snapshot_date: NaiveDate::from_ymd_opt(2025, 5, 15).unwrap(),
            total_in_usd: 100.0,
            total_in_rub: 8000.0,
        }]);
        assert!(output.contains("2025-05-15"));
        assert!(output.contains("8000.00"));
    }
}
