use super::ui;
use crate::core::CapitalSnapshotService;
use crate::core::model::UserId;
use anyhow::Result;
use chrono::NaiveDate;

pub async fn create(
    service: &CapitalSnapshotService,
    user: UserId,
    date: Option<NaiveDate>,
) -> Result<()> {
    let pb = ui::new_spinner("Creating snapshot...");
    let created = service.create_snapshot(user, date).await;
    pb.finish_and_clear();

    let label = date.map_or_else(|| "today".to_string(), |d| d.to_string());
    if created? {
        println!("Snapshot for {label} created.");
    } else {
        println!(
            "{}",
            ui::style_text(
                &format!("Snapshot for {label} already exists."),
                ui::StyleType::Subtle
            )
        );
    }
    Ok(())
}

pub async fn create_for_all(service: &CapitalSnapshotService, date: Option<NaiveDate>) -> Result<()> {
    let pb = ui::new_progress_bar(0, true);
    pb.set_message("Creating snapshots...");
    let run = service
        .create_snapshots_for_all(date, &|done, total| {
            pb.set_length(total);
            pb.set_position(done);
        })
        .await;
    pb.finish_and_clear();

    let run = run?;
    println!(
        "Created {}, already present {}, failed {}",
        ui::style_text(&run.created.to_string(), ui::StyleType::TotalValue),
        run.existing,
        run.failed
    );
    if run.failed > 0 {
        anyhow::bail!("{} snapshot(s) failed, see the log for details", run.failed);
    }
    Ok(())
}
