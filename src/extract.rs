use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

/// Default substituted whenever a selector matches nothing.
pub const NOT_FOUND: &str = "not-found";

/// One job listing, flattened from a single `<li>` result fragment.
/// Fields are never empty-for-missing: absent values hold [`NOT_FOUND`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub job_title: String,
    pub job_detail_url: String,
    pub job_listed: String,
    pub company_image: String,
    pub company_name: String,
    pub company_link: String,
    pub company_location: String,
}

impl JobRecord {
    /// The seven field values in declaration order, as one sheet row.
    pub fn as_row(&self) -> Vec<String> {
        vec![
            self.job_title.clone(),
            self.job_detail_url.clone(),
            self.job_listed.clone(),
            self.company_image.clone(),
            self.company_name.clone(),
            self.company_link.clone(),
            self.company_location.clone(),
        ]
    }
}

struct Selectors {
    item: Selector,
    title: Selector,
    detail_link: Selector,
    listed: Selector,
    image: Selector,
    company: Selector,
    location: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            item: Selector::parse("li").unwrap(),
            title: Selector::parse("h3").unwrap(),
            detail_link: Selector::parse(".base-card__full-link").unwrap(),
            listed: Selector::parse("time").unwrap(),
            image: Selector::parse("div img").unwrap(),
            company: Selector::parse("h4 a").unwrap(),
            location: Selector::parse(".job-search-card__location").unwrap(),
        }
    }
}

/// Parse one page of the guest search response into records, one per `li`
/// fragment. No filtering here; the caller decides which records to keep.
pub fn parse_page(html: &str) -> Vec<JobRecord> {
    let doc = Html::parse_document(html);
    let sel = Selectors::new();
    doc.select(&sel.item).map(|li| extract_one(li, &sel)).collect()
}

fn extract_one(li: ElementRef, sel: &Selectors) -> JobRecord {
    JobRecord {
        job_title: text_field(li, &sel.title),
        // Attribute lookup, but trimmed like the text fields.
        job_detail_url: select_attr(li, &sel.detail_link, "href")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| NOT_FOUND.to_string()),
        job_listed: text_field(li, &sel.listed),
        company_image: attr_field(li, &sel.image, "data-delayed-url"),
        company_name: text_field(li, &sel.company),
        company_link: attr_field(li, &sel.company, "href"),
        company_location: text_field(li, &sel.location),
    }
}

/// First matching element's text, trimmed, or the sentinel.
fn text_field(el: ElementRef, sel: &Selector) -> String {
    el.select(sel)
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .unwrap_or_else(|| NOT_FOUND.to_string())
}

/// First matching element's attribute, verbatim, or the sentinel.
fn attr_field(el: ElementRef, sel: &Selector, attr: &str) -> String {
    select_attr(el, sel, attr).unwrap_or_else(|| NOT_FOUND.to_string())
}

fn select_attr(el: ElementRef, sel: &Selector, attr: &str) -> Option<String> {
    el.select(sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .map(str::to_string)
}

/// Location filter. A record is kept unless its location mentions both
/// "United States" and "Canada", so any single-country string passes.
pub fn keep_location(location: &str) -> bool {
    !location.contains("United States") || !location.contains("Canada")
}

// ── Tests ──
