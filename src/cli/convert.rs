use super::ui;
use crate::core::CurrencyConverter;
use anyhow::Result;

pub async fn run(converter: &dyn CurrencyConverter, amount: f64, from: &str, to: &str) -> Result<()> {
    let pb = ui::new_spinner("Fetching rates...");
    let result = converter.convert(amount, from, to).await;
    pb.finish_and_clear();

    let converted = result?;
    println!(
        "{amount} {} = {}",
        from.trim().to_uppercase(),
        ui::style_text(
            &format!("{converted:.6} {}", to.trim().to_uppercase()),
            ui::StyleType::TotalValue
        )
    );
    Ok(())
}
