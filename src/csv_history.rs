use csv::WriterBuilder;
use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::accounting::ProfitLossReport;
use crate::accounting::events::ProfitLossEvent;
use crate::domain::fval::timestamp_to_date;

const EVENT_HEADER: [&str; 13] = [
    "type",
    "location",
    "paid_in_profit_currency",
    "paid_asset",
    "paid_in_asset",
    "taxable_amount",
    "taxable_bought_cost_in_profit_currency",
    "received_asset",
    "taxable_received_in_profit_currency",
    "received_in_asset",
    "net_profit_or_loss",
    "time",
    "is_virtual",
];

pub fn write_events_csv<W: Write>(writer: W, events: &[ProfitLossEvent]) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(EVENT_HEADER)?;
    for event in events {
        let asset_or_empty = |a: &Option<crate::domain::asset::Asset>| {
            a.as_ref().map(|a| a.to_string()).unwrap_or_default()
        };
        wtr.write_record([
            event.event_type.as_str().to_string(),
            event.location.to_string(),
            event.paid_in_profit_currency.to_string(),
            asset_or_empty(&event.paid_asset),
            event.paid_in_asset.to_string(),
            event.taxable_amount.to_string(),
            event.taxable_bought_cost_in_profit_currency.to_string(),
            asset_or_empty(&event.received_asset),
            event.taxable_received_in_profit_currency.to_string(),
            event.received_in_asset.to_string(),
            event.net_profit_or_loss.to_string(),
            timestamp_to_date(event.time),
            event.is_virtual.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_overview_csv<W: Write>(writer: W, report: &ProfitLossReport) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(["result", "value"])?;
    let overview = serde_json::to_value(&report.overview)?;
    if let serde_json::Value::Object(fields) = overview {
        for (key, value) in fields {
            let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            wtr.write_record([key, value])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Writes `all_events.csv` and `overview.csv` into `dir`, creating it if needed.
pub fn export_report(report: &ProfitLossReport, dir: &Path) -> Result<(), Box<dyn Error + Send + Sync>> {
    fs::create_dir_all(dir)?;
    write_events_csv(fs::File::create(dir.join("all_events.csv"))?, &report.all_events)?;
    write_overview_csv(fs::File::create(dir.join("overview.csv"))?, report)?;
    info!(dir = %dir.display(), events = report.all_events.len(), "Exported report CSV");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::events::EventType;
    use crate::domain::asset::{Asset, Location};
    use crate::domain::fval::ZERO;
    use rust_decimal_macros::dec;

    #[test]
    fn test_events_csv_layout() {
        let event = ProfitLossEvent {
            event_type: EventType::Sell,
            location: Location::Kraken,
            paid_in_profit_currency: ZERO,
            paid_asset: Some(Asset::new("BTC")),
            paid_in_asset: dec!(1),
            taxable_amount: dec!(1),
            taxable_bought_cost_in_profit_currency: dec!(100),
            received_asset: Some(Asset::new("EUR")),
            taxable_received_in_profit_currency: dec!(150),
            received_in_asset: dec!(150),
            net_profit_or_loss: dec!(50),
            time: 0,
            is_virtual: false,
            cost_basis: None,
        };
        let mut out = Vec::new();
        write_events_csv(&mut out, &[event]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("type,location,"));
        assert_eq!(
            lines[1],
            "sell,kraken,0,BTC,1,1,100,EUR,150,150,50,01/01/1970 00:00:00,false"
        );
    }
}
