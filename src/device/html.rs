use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::swipes::SwipePage;
use super::DeviceError;
use crate::models::{Card, SwipeRecord};

/// Timestamp format used by the swipe log (device-local time)
const DEVICE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("TABLE is a valid selector"));

static TABLE_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table > tbody > tr").expect("TABLE_ROW is a valid selector"));

static DOOR_IN_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").expect("DOOR_IN_STATUS is a valid regex pattern"));

/// Parses one page of the swipe log.
///
/// Reboot entries and rows without a readable id are dropped from `swipes`
/// but still count towards `rows`, which drives pagination. A timestamp
/// that can't be parsed becomes the zero time instead of failing the page.
pub fn parse_swipe_page(body: &str) -> Result<SwipePage, DeviceError> {
    let rows: Vec<Vec<String>> = table_rows(body)?
        .into_iter()
        .filter(|cells| !cells.is_empty())
        .collect();

    Ok(SwipePage {
        rows: rows.len(),
        first_id: rows.first().and_then(|cells| cell(cells, 0).parse().ok()),
        swipes: rows.iter().filter_map(|cells| parse_swipe_row(cells)).collect(),
    })
}

/// Parses the card list page. Columns are id, keyfob number and name.
pub fn parse_card_page(body: &str) -> Result<Vec<Card>, DeviceError> {
    let rows = table_rows(body)?;

    Ok(rows
        .iter()
        .filter_map(|cells| {
            let id = cell(cells, 0).parse().ok()?;
            Some(Card {
                id,
                number: cell(cells, 1).parse().unwrap_or(0),
                name: cell(cells, 2).to_string(),
            })
        })
        .collect())
}

fn parse_swipe_row(cells: &[String]) -> Option<SwipeRecord> {
    let status = cell(cells, 3);

    let id = cell(cells, 0).parse::<i64>().unwrap_or(0);
    if id == 0 || status.contains("Reboot") {
        return None;
    }

    let door_id = if status.contains("Allow IN") {
        DOOR_IN_STATUS
            .captures(status)
            .map(|captures| captures[1].to_string())
            .unwrap_or_default()
    } else {
        String::new()
    };

    Some(SwipeRecord {
        id,
        card_id: cell(cells, 1).parse().unwrap_or(0),
        name: cell(cells, 2).to_string(),
        status: status.to_string(),
        door_id,
        time: parse_device_time(cell(cells, 4)),
    })
}

/// Device timestamps carry no zone and are taken as UTC.
pub fn parse_device_time(text: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(text, DEVICE_TIME_FORMAT)
        .map(|time| time.and_utc())
        .unwrap_or_default()
}

/// Text of the `td` cells of every table body row.
fn table_rows(body: &str) -> Result<Vec<Vec<String>>, DeviceError> {
    let document = Html::parse_document(body);
    if document.select(&TABLE).next().is_none() {
        return Err(DeviceError::MissingTable);
    }

    Ok(document
        .select(&TABLE_ROW)
        .map(|row| {
            row.children()
                .filter_map(ElementRef::wrap)
                .filter(|child| child.value().name() == "td")
                .map(|td| td.text().collect::<String>().trim().to_string())
                .collect()
        })
        .collect())
}

fn cell(cells: &[String], index: usize) -> &str {
    cells.get(index).map(String::as_str).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SWIPES_FIXTURE: &str = include_str!("fixtures/swipes.html");

    #[test]
    fn test_parse_swipe_page() {
        let page = parse_swipe_page(SWIPES_FIXTURE).unwrap();
        assert_eq!(page.rows, 5);
        assert_eq!(page.first_id, Some(1204));

        let swipes = page.swipes;
        let ids: Vec<i64> = swipes.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1204, 1203, 1202, 1200]);

        assert_eq!(
            swipes[0],
            SwipeRecord {
                id: 1204,
                card_id: 9001,
                name: "592af5478f6842d88b814a5d233b7cce".to_string(),
                status: "Allow IN[Front Door]".to_string(),
                door_id: "Front Door".to_string(),
                time: Utc.with_ymd_and_hms(2024, 3, 9, 18, 42, 7).unwrap(),
            }
        );
        assert_eq!(swipes[1].door_id, "Shop");
        assert_eq!(swipes[1].name, "Jane Doe");
    }

    #[test]
    fn test_denied_swipe_has_no_door() {
        let swipes = parse_swipe_page(SWIPES_FIXTURE).unwrap().swipes;
        let denied = swipes.iter().find(|s| s.id == 1202).unwrap();

        assert_eq!(denied.door_id, "");
        assert_eq!(denied.status, "Deny IN(No Access)[Front Door]");
    }

    #[test]
    fn test_bad_timestamp_becomes_zero_time() {
        let swipes = parse_swipe_page(SWIPES_FIXTURE).unwrap().swipes;
        let last = swipes.last().unwrap();

        assert_eq!(last.id, 1200);
        assert_eq!(last.time, DateTime::<Utc>::default());
    }

    #[test]
    fn test_missing_table_is_an_error() {
        let err = parse_swipe_page("<html><body>Please log in</body></html>").unwrap_err();
        assert!(matches!(err, DeviceError::MissingTable));
    }

    #[test]
    fn test_empty_table_yields_no_rows() {
        let page = parse_swipe_page("<table><tr><th>Index</th></tr></table>").unwrap();
        assert_eq!(page, SwipePage::default());
    }

    #[test]
    fn test_parse_card_page() {
        let body = r#"
            <table>
              <tr><th>ID</th><th>Card NO.</th><th>Name</th></tr>
              <tr><td>3</td><td>9001</td><td>592af5478f6842d88b814a5d233b7cce</td></tr>
              <tr><td>7</td><td>500</td><td> any name </td></tr>
            </table>
        "#;

        let cards = parse_card_page(body).unwrap();
        assert_eq!(
            cards,
            vec![
                Card {
                    id: 3,
                    number: 9001,
                    name: "592af5478f6842d88b814a5d233b7cce".to_string(),
                },
                Card {
                    id: 7,
                    number: 500,
                    name: "any name".to_string(),
                },
            ]
        );
    }
}
