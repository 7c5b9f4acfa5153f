use super::ui;
use crate::core::model::{EntryRef, UserId};
use crate::core::{CapitalSnapshotService, SlotChange};
use crate::store::journal::EntryJournal;
use anyhow::Result;
use comfy_table::{Cell, CellAlignment};
use rust_decimal::Decimal;

/// Journals an asset entry and updates the projection, like the bookkeeping
/// layer does on every asset-mode write.
pub async fn add(
    journal: &EntryJournal,
    service: &CapitalSnapshotService,
    user: UserId,
    currency: &str,
    category: &str,
    amount: Decimal,
) -> Result<()> {
    let entry = journal.add(user, currency, category, amount).await?;
    service
        .on_asset_transaction_written(
            user,
            &entry.currency_code,
            &entry.category_name,
            entry.amount,
            entry.entry_ref,
        )
        .await?;
    println!(
        "Recorded entry {}: {} {} in {}",
        ui::style_text(&entry.entry_ref.to_string(), ui::StyleType::TotalLabel),
        entry.amount,
        entry.currency_code,
        entry.category_name
    );
    Ok(())
}

pub async fn remove(
    journal: &EntryJournal,
    service: &CapitalSnapshotService,
    user: UserId,
    entry_ref: EntryRef,
) -> Result<()> {
    let entry = journal.remove(user, entry_ref).await?;
    let change = service
        .on_asset_transaction_deleted(user, &entry.currency_code, &entry.category_name, entry_ref)
        .await?;

    let outcome = match change {
        SlotChange::Repointed(row) => format!(
            "{} in {} now {} (entry {})",
            row.currency_code, row.category_name, row.amount, row.origin_transaction_ref
        ),
        SlotChange::Removed => format!(
            "{} in {} no longer held",
            entry.currency_code, entry.category_name
        ),
        SlotChange::Unchanged => "latest values unchanged".to_string(),
    };
    println!("Removed entry {entry_ref}: {outcome}");
    Ok(())
}

pub async fn list(service: &CapitalSnapshotService, user: UserId) -> Result<()> {
    let grouped = service.assets().assets_by_currency(user).await?;
    if grouped.is_empty() {
        println!("No assets recorded for user {user}.");
        return Ok(());
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Currency"),
        ui::header_cell("Category"),
        ui::header_cell("Amount"),
        ui::header_cell("Updated"),
        ui::header_cell("Entry"),
    ]);
    for (currency, rows) in &grouped {
        for row in rows {
            table.add_row(vec![
                Cell::new(currency),
                Cell::new(&row.category_name),
                Cell::new(row.amount).set_alignment(CellAlignment::Right),
                Cell::new(row.last_updated.format("%Y-%m-%d %H:%M")),
                Cell::new(row.origin_transaction_ref),
            ]);
        }
    }
    println!("{table}");
    Ok(())
}
