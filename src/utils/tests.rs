use super::*;
use std::collections::BTreeMap;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn day(date: &str, sessions: u64, cost: f64) -> DayStats {
    let bucket = UsageBucket {
        sessions,
        messages: sessions * 2,
        input_tokens: 1000 * sessions,
        cost_usd: cost,
        ..Default::default()
    };
    DayStats {
        date: date.to_string(),
        totals: bucket.clone(),
        by_source: BTreeMap::from([("claude".to_string(), bucket.clone())]),
        by_model: BTreeMap::from([("claude-sonnet-4".to_string(), bucket.clone())]),
        by_repo: BTreeMap::from([("app".to_string(), bucket)]),
    }
}

#[test]
fn test_format_number_comma() {
    let options = NumberFormatOptions {
        use_comma: true,
        use_human: false,
        locale: "en".to_string(),
        decimal_places: 2,
    };

    assert_eq!(format_number(1000u64, &options), "1,000");
    assert_eq!(format_number(1000000u64, &options), "1,000,000");
    assert_eq!(format_number(123u64, &options), "123");
}

#[test]
fn test_format_number_human() {
    let options = NumberFormatOptions {
        use_comma: false,
        use_human: true,
        locale: "en".to_string(),
        decimal_places: 1,
    };

    assert_eq!(format_number(100u64, &options), "100");
    assert_eq!(format_number(1500u64, &options), "1.5k");
    assert_eq!(format_number(1_500_000u64, &options), "1.5m");
    assert_eq!(format_number(1_500_000_000u64, &options), "1.5b");
    assert_eq!(format_number(1_500_000_000_000u64, &options), "1.5t");
}

#[test]
fn test_format_cost_and_duration() {
    assert_eq!(format_cost(0.0), "$0.00");
    assert_eq!(format_cost(0.001), "<$0.01");
    assert_eq!(format_cost(12.345), "$12.35");

    assert_eq!(format_duration_ms(12_000), "12s");
    assert_eq!(format_duration_ms(185_000), "3m 05s");
    assert_eq!(format_duration_ms(3_720_000), "1h 02m");
}

#[test]
fn test_format_date_for_display() {
    let today = date(2025, 3, 9);
    assert_eq!(format_date_for_display("invalid", today), "invalid");
    assert_eq!(format_date_for_display("2023-01-15", today), "1/15/2023");
    assert_eq!(format_date_for_display("2025-03-09", today), "3/9/2025*");
}

#[test]
fn test_daily_rows_fill_gaps() {
    let store: DailyStore = BTreeMap::from([
        ("2025-03-01".to_string(), day("2025-03-01", 2, 0.5)),
        ("2025-03-04".to_string(), day("2025-03-04", 1, 0.25)),
    ]);

    let rows = daily_rows(&store, &DailyFilter::All);
    let dates: Vec<&str> = rows.iter().map(|(d, _)| d.as_str()).collect();
    assert_eq!(dates, vec!["2025-03-01", "2025-03-02", "2025-03-03", "2025-03-04"]);
    assert_eq!(rows[1].1, UsageBucket::default());
    assert_eq!(rows[0].1.sessions, 2);

    let codex = daily_rows(&store, &DailyFilter::Source(Source::Codex));
    assert!(codex.iter().all(|(_, b)| b.sessions == 0));
    let sonnet = daily_rows(&store, &DailyFilter::Model("claude-sonnet-4".to_string()));
    assert_eq!(sonnet[3].1.sessions, 1);

    assert!(daily_rows(&DailyStore::new(), &DailyFilter::All).is_empty());
}

#[test]
fn test_render_daily_table_totals() {
    let store: DailyStore = BTreeMap::from([
        ("2025-03-01".to_string(), day("2025-03-01", 2, 0.5)),
        ("2025-03-02".to_string(), day("2025-03-02", 1, 0.25)),
    ]);
    let rows = daily_rows(&store, &DailyFilter::All);
    let table = render_daily_table(&rows, date(2025, 3, 2), &NumberFormatOptions::default());

    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("Date"));
    assert!(lines[2].starts_with("3/2/2025*"));
    assert!(lines[3].starts_with("Total"));
    assert!(lines[3].contains("3,000"));
    assert!(lines[3].ends_with("$0.75"));
}
