//! Listing page parser.
//!
//! Containers are `tr` rows whose `id` starts with `tr`. For each container the
//! fields are resolved independently; a missing element only ever yields the
//! sentinel for that one field, so every detected container produces exactly
//! one [`ParsedListing`].
//!
//! # Field precedence
//!
//! | Field | Strategies, in order |
//! |-------|----------------------|
//! | reference | centred 5%-width cell |
//! | position | `span#hdnJC1` title element, then the 28%-width description block |
//! | employer | first `h1` |
//! | dates | `td[nowrap]` cells 1 (opening) and 2 (closing) |

use crate::models::{ListingDraft, SENTINEL, or_sentinel};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css:?}: {e}"))
}

static CONTAINER: Lazy<Selector> = Lazy::new(|| selector("tr[id^='tr']"));
static REFERENCE: Lazy<Selector> = Lazy::new(|| selector("td[width='5%'][align='center']"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("span#hdnJC1"));
static DESCRIPTION: Lazy<Selector> = Lazy::new(|| selector("td[width='28%']"));
static EMPLOYER: Lazy<Selector> = Lazy::new(|| selector("h1"));
static NOWRAP_CELL: Lazy<Selector> = Lazy::new(|| selector("td[nowrap]"));

/// Padding marker the site inserts into description blocks.
const PADDING_MARKER: &str = "DEFZZZ";
/// Prefix of the numeric boilerplate codes in description blocks.
const BOILERPLATE_PREFIX: &str = "000";
/// Shown instead of the employer name for confidential adverts.
const WITHHELD_PHRASE: &str = "company name withheld";

/// A field resolution strategy: `Some` only for a non-empty value.
pub type Resolver = fn(&ElementRef<'_>) -> Option<String>;

/// Position strategies in priority order.
pub const POSITION_RESOLVERS: &[Resolver] = &[title_element, description_block];

/// How to reach a listing's detail view in the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingHandle {
    /// The container's `id` attribute, e.g. `tr3`.
    pub row_id: String,
}

impl ListingHandle {
    /// CSS selector for the click target.
    pub fn click_selector(&self) -> String {
        format!("tr[id=\"{}\"]", self.row_id.replace('"', "\\\""))
    }
}

/// Parser output for one container.
#[derive(Debug, Clone)]
pub struct ParsedListing {
    pub handle: ListingHandle,
    pub draft: ListingDraft,
}

/// Parse a listing page into one [`ParsedListing`] per container, in document order.
#[instrument(level = "info", skip_all, fields(bytes = markup.len()))]
pub fn parse_listings(markup: &str) -> Vec<ParsedListing> {
    let document = Html::parse_document(markup);

    let listings: Vec<ParsedListing> = document
        .select(&CONTAINER)
        .enumerate()
        .map(|(index, container)| parse_container(index, &container))
        .collect();

    if listings.is_empty() {
        warn!("No listing containers found on page");
    } else {
        info!(count = listings.len(), "Parsed listing containers");
    }
    listings
}

fn parse_container(index: usize, container: &ElementRef<'_>) -> ParsedListing {
    let row_id = container
        .value()
        .attr("id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("tr{index}"));

    let reference = first_text(container, &REFERENCE);
    let employer = first_text(container, &EMPLOYER);
    let (opening_date, closing_date) = resolve_dates(container);

    let draft = ListingDraft {
        reference: or_sentinel(reference.as_deref()),
        position: resolve(container, POSITION_RESOLVERS),
        employer: or_sentinel(employer.as_deref()),
        opening_date,
        closing_date,
        ..ListingDraft::sentinel()
    };

    if draft.position == SENTINEL || draft.employer == SENTINEL || draft.opening_date == SENTINEL {
        debug!(%row_id, ?draft, "Container has unresolved fields");
    }

    ParsedListing {
        handle: ListingHandle { row_id },
        draft,
    }
}

/// Apply `resolvers` in order; the first non-empty result wins.
pub fn resolve(container: &ElementRef<'_>, resolvers: &[Resolver]) -> String {
    resolvers
        .iter()
        .find_map(|resolver| resolver(container))
        .unwrap_or_else(|| SENTINEL.to_string())
}

/// The dedicated title element.
pub fn title_element(container: &ElementRef<'_>) -> Option<String> {
    first_text(container, &TITLE)
}

/// First meaningful segment of the free-text description block.
///
/// Skips the padding marker, numeric boilerplate codes and the withheld-employer
/// phrase, in document order.
pub fn description_block(container: &ElementRef<'_>) -> Option<String> {
    let block = container.select(&DESCRIPTION).next()?;
    block
        .text()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .find(|part| {
            *part != PADDING_MARKER
                && !part.starts_with(BOILERPLATE_PREFIX)
                && !part.eq_ignore_ascii_case(WITHHELD_PHRASE)
        })
        .map(str::to_string)
}

/// Opening and closing dates from the no-wrap cells at positions 1 and 2.
fn resolve_dates(container: &ElementRef<'_>) -> (String, String) {
    let cells: Vec<String> = container.select(&NOWRAP_CELL).map(|c| element_text(&c)).collect();
    if cells.len() < 2 {
        return (SENTINEL.to_string(), SENTINEL.to_string());
    }
    (
        or_sentinel(cells.get(1).map(String::as_str)),
        or_sentinel(cells.get(2).map(String::as_str)),
    )
}

fn first_text(container: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    container
        .select(sel)
        .next()
        .map(|e| element_text(&e))
        .filter(|t| !t.is_empty())
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(rows: &str) -> String {
        format!("<html><body><table>{rows}</table></body></html>")
    }

    const FULL_ROW: &str = r#"
        <tr id="tr0" onclick="createAlert('0','0000999','DEFZZZ','1')">
          <td width="5%" align="center">0001234</td>
          <td width="28%">
            <h2><span id="hdnJC1">Senior Backend Engineer</span></h2>
            <h1>Acme Holdings</h1>
          </td>
          <td nowrap>Full Time</td>
          <td nowrap>Mon Oct 06 2025</td>
          <td nowrap>Mon Oct 20 2025</td>
        </tr>"#;

    fn container_of(html: &str) -> (Html, Selector) {
        (Html::parse_document(&page(html)), CONTAINER.clone())
    }

    #[test]
    fn test_full_row_resolves_every_field() {
        let listings = parse_listings(&page(FULL_ROW));
        assert_eq!(listings.len(), 1);

        let l = &listings[0];
        assert_eq!(l.handle.row_id, "tr0");
        assert_eq!(l.draft.reference, "0001234");
        assert_eq!(l.draft.position, "Senior Backend Engineer");
        assert_eq!(l.draft.employer, "Acme Holdings");
        assert_eq!(l.draft.opening_date, "Mon Oct 06 2025");
        assert_eq!(l.draft.closing_date, "Mon Oct 20 2025");
        assert_eq!(l.draft.extracted_text, SENTINEL);
        assert!(l.draft.seo_title.is_none());
    }

    #[test]
    fn test_title_element_wins_over_description() {
        let (doc, sel) = container_of(
            r#"<tr id="tr1"><td width="28%">
                 <span id="hdnJC1">Data Analyst</span><br>Other Text
               </td></tr>"#,
        );
        let container = doc.select(&sel).next().unwrap();
        assert_eq!(resolve(&container, POSITION_RESOLVERS), "Data Analyst");
    }

    #[test]
    fn test_description_fallback_skips_placeholders() {
        let (doc, sel) = container_of(
            r#"<tr id="tr2"><td width="28%">
                 <span>DEFZZZ</span><br>
                 <span>000123</span><br>
                 <span>Company Name Withheld</span><br>
                 <span>Backend Engineer</span>
               </td></tr>"#,
        );
        let container = doc.select(&sel).next().unwrap();
        assert_eq!(title_element(&container), None);
        assert_eq!(resolve(&container, POSITION_RESOLVERS), "Backend Engineer");
    }

    #[test]
    fn test_empty_title_element_falls_through() {
        let (doc, sel) = container_of(
            r#"<tr id="tr3"><td width="28%">
                 <span id="hdnJC1">   </span>QA Lead
               </td></tr>"#,
        );
        let container = doc.select(&sel).next().unwrap();
        assert_eq!(resolve(&container, POSITION_RESOLVERS), "QA Lead");
    }

    #[test]
    fn test_position_sentinel_when_nothing_resolves() {
        let (doc, sel) = container_of(
            r#"<tr id="tr4"><td width="28%">DEFZZZ<br>0004411</td></tr>"#,
        );
        let container = doc.select(&sel).next().unwrap();
        assert_eq!(resolve(&container, POSITION_RESOLVERS), SENTINEL);
    }

    #[test]
    fn test_one_record_per_container_even_when_malformed() {
        let rows = format!(
            "{FULL_ROW}<tr id=\"tr1\"></tr><tr id=\"tr2\"><td>garbage</td></tr><tr id=\"other\"><td>x</td></tr>"
        );
        let listings = parse_listings(&page(&rows));
        // `other` does not carry the container prefix.
        assert_eq!(listings.len(), 3);
        for l in &listings[1..] {
            assert_eq!(l.draft.reference, SENTINEL);
            assert_eq!(l.draft.position, SENTINEL);
            assert_eq!(l.draft.employer, SENTINEL);
            assert_eq!(l.draft.opening_date, SENTINEL);
            assert_eq!(l.draft.closing_date, SENTINEL);
        }
    }

    #[test]
    fn test_document_order_preserved() {
        let rows = r#"<tr id="tr7"><td><h1>Seven</h1></td></tr>
                      <tr id="tr2"><td><h1>Two</h1></td></tr>
                      <tr id="tr9"><td><h1>Nine</h1></td></tr>"#;
        let ids: Vec<String> = parse_listings(&page(rows))
            .into_iter()
            .map(|l| l.handle.row_id)
            .collect();
        assert_eq!(ids, vec!["tr7", "tr2", "tr9"]);
    }

    #[test]
    fn test_missing_date_cells_yield_sentinel_pair() {
        let rows = format!(
            "{FULL_ROW}
            <tr id=\"tr1\">
              <td width=\"5%\" align=\"center\">0005678</td>
              <td width=\"28%\"><span id=\"hdnJC1\">Accountant</span><h1>Beta Traders</h1></td>
            </tr>"
        );
        let listings = parse_listings(&page(&rows));
        assert_eq!(listings.len(), 2);

        let second = &listings[1].draft;
        assert_eq!(second.opening_date, SENTINEL);
        assert_eq!(second.closing_date, SENTINEL);
        assert_eq!(second.reference, "0005678");
        assert_eq!(second.position, "Accountant");
        assert_eq!(second.employer, "Beta Traders");
    }

    #[test]
    fn test_two_date_cells_leave_closing_sentinel() {
        let (doc, sel) = container_of(
            r#"<tr id="tr5"><td nowrap>Contract</td><td nowrap>Tue Oct 07 2025</td></tr>"#,
        );
        let container = doc.select(&sel).next().unwrap();
        assert_eq!(
            resolve_dates(&container),
            ("Tue Oct 07 2025".to_string(), SENTINEL.to_string())
        );
    }

    #[test]
    fn test_click_selector_targets_row() {
        let handle = ListingHandle {
            row_id: "tr12".to_string(),
        };
        assert_eq!(handle.click_selector(), "tr[id=\"tr12\"]");
    }

    #[test]
    fn test_page_without_containers() {
        assert!(parse_listings("<html><body><p>maintenance</p></body></html>").is_empty());
    }
}
