use std::collections::VecDeque;

use anyhow::Result;
use tracing::{debug, info};

use crate::extract::{self, JobRecord};
use crate::fetch::PageFetcher;
use crate::sheets::RecordSink;

/// Listings per page of the guest search endpoint; also the offset stride.
pub const PAGE_SIZE: usize = 25;

/// Lazy crawl over the paginated search results. Yields one record per kept
/// listing, in page order then item order within a page. Terminates when a
/// fetched page contains zero `li` fragments, or after the optional page
/// limit. A fetch fault is yielded once as `Err`, then the sequence ends.
///
/// Every record is forwarded to the sink before it is yielded; sink faults
/// are logged by the sink itself and never stop the crawl.
pub struct Crawl {
    fetcher: Box<dyn PageFetcher>,
    sink: Box<dyn RecordSink>,
    offset: usize,
    buffer: VecDeque<JobRecord>,
    pages_fetched: usize,
    max_pages: Option<usize>,
    done: bool,
}

impl Crawl {
    pub fn new(
        fetcher: Box<dyn PageFetcher>,
        sink: Box<dyn RecordSink>,
        max_pages: Option<usize>,
    ) -> Self {
        Self {
            fetcher,
            sink,
            offset: 0,
            buffer: VecDeque::new(),
            pages_fetched: 0,
            max_pages,
            done: false,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }
}

impl Iterator for Crawl {
    type Item = Result<JobRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                // Forward-then-yield; the return value is deliberately not
                // inspected here (see RecordSink).
                let _ = self.sink.append(&record);
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }
            if self.max_pages.is_some_and(|max| self.pages_fetched >= max) {
                debug!("Page limit reached after {} pages", self.pages_fetched);
                self.done = true;
                return None;
            }

            let html = match self.fetcher.fetch_page(self.offset) {
                Ok(body) => body,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            self.pages_fetched += 1;

            let listings = extract::parse_page(&html);
            info!(
                "Page at offset {} returned {} listings",
                self.offset,
                listings.len()
            );
            if listings.is_empty() {
                self.done = true;
                return None;
            }

            self.offset += PAGE_SIZE;
            self.buffer.extend(
                listings
                    .into_iter()
                    .filter(|r| extract::keep_location(&r.company_location)),
            );
            // All items filtered out: loop around and fetch the next page.
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::sheets::{SheetsError, UpdateStats};

    const CANADA_AND_GERMANY: &str = r#"
        <li>
          <h3>Job A</h3>
          <span class="job-search-card__location">Toronto, Canada</span>
        </li>
        <li>
          <h3>Job B</h3>
          <span class="job-search-card__location">Berlin, Germany</span>
        </li>"#;

    struct FakeFetcher {
        pages: Vec<&'static str>,
        requested: Rc<RefCell<Vec<usize>>>,
    }

    impl PageFetcher for FakeFetcher {
        fn fetch_page(&self, offset: usize) -> Result<String> {
            self.requested.borrow_mut().push(offset);
            let idx = offset / PAGE_SIZE;
            match self.pages.get(idx) {
                Some(body) => Ok(body.to_string()),
                None => anyhow::bail!("no page at offset {}", offset),
            }
        }
    }

    struct RecordingSink {
        appended: Rc<RefCell<Vec<JobRecord>>>,
    }

    impl RecordSink for RecordingSink {
        fn append(&mut self, record: &JobRecord) -> Result<UpdateStats, SheetsError> {
            self.appended.borrow_mut().push(record.clone());
            Ok(UpdateStats { updated_cells: 7 })
        }
    }

    struct FailingSink;

    impl RecordSink for FailingSink {
        fn append(&mut self, _record: &JobRecord) -> Result<UpdateStats, SheetsError> {
            Err(SheetsError::Api {
                status: 429,
                body: "quota exceeded".into(),
            })
        }
    }

    fn crawl_with(
        pages: Vec<&'static str>,
    ) -> (Crawl, Rc<RefCell<Vec<usize>>>, Rc<RefCell<Vec<JobRecord>>>) {
        let requested = Rc::new(RefCell::new(Vec::new()));
        let appended = Rc::new(RefCell::new(Vec::new()));
        let fetcher = FakeFetcher {
            pages,
            requested: Rc::clone(&requested),
        };
        let sink = RecordingSink {
            appended: Rc::clone(&appended),
        };
        (
            Crawl::new(Box::new(fetcher), Box::new(sink), None),
            requested,
            appended,
        )
    }

    #[test]
    fn nonempty_page_advances_offset_by_page_size() {
        let (crawl, requested, appended) = crawl_with(vec![CANADA_AND_GERMANY, ""]);
        let records: Vec<JobRecord> = crawl.map(Result::unwrap).collect();

        // Both items pass the literal filter, each is sink-forwarded once,
        // and a follow-up fetch goes out at offset 25.
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].job_title, "Job A");
        assert_eq!(records[1].job_title, "Job B");
        assert_eq!(*requested.borrow(), vec![0, PAGE_SIZE]);
        assert_eq!(appended.borrow().len(), 2);
    }

    #[test]
    fn empty_page_terminates_without_further_fetch() {
        let (crawl, requested, appended) = crawl_with(vec![""]);
        assert_eq!(crawl.count(), 0);
        assert_eq!(*requested.borrow(), vec![0]);
        assert!(appended.borrow().is_empty());
    }

    #[test]
    fn records_come_in_page_then_item_order() {
        let second = r#"<li><h3>Job C</h3>
            <span class="job-search-card__location">Lisbon, Portugal</span></li>"#;
        let (crawl, _, appended) = crawl_with(vec![CANADA_AND_GERMANY, second, ""]);
        let titles: Vec<String> = crawl.map(|r| r.unwrap().job_title).collect();
        assert_eq!(titles, vec!["Job A", "Job B", "Job C"]);
        // Sink order matches yield order.
        let sunk: Vec<String> = appended
            .borrow()
            .iter()
            .map(|r| r.job_title.clone())
            .collect();
        assert_eq!(sunk, titles);
    }

    #[test]
    fn fetch_fault_yields_one_err_then_ends() {
        // Page 0 is full, page 1 is missing, so the second fetch fails.
        let (mut crawl, requested, _) = crawl_with(vec![CANADA_AND_GERMANY]);
        assert!(crawl.next().unwrap().is_ok());
        assert!(crawl.next().unwrap().is_ok());
        assert!(crawl.next().unwrap().is_err());
        assert!(crawl.next().is_none());
        assert_eq!(*requested.borrow(), vec![0, PAGE_SIZE]);
    }

    #[test]
    fn sink_fault_does_not_stop_the_crawl() {
        let requested = Rc::new(RefCell::new(Vec::new()));
        let fetcher = FakeFetcher {
            pages: vec![CANADA_AND_GERMANY, ""],
            requested: Rc::clone(&requested),
        };
        let crawl = Crawl::new(Box::new(fetcher), Box::new(FailingSink), None);
        let records: Vec<JobRecord> = crawl.map(Result::unwrap).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(*requested.borrow(), vec![0, PAGE_SIZE]);
    }

    #[test]
    fn page_limit_stops_after_n_pages() {
        let requested = Rc::new(RefCell::new(Vec::new()));
        let fetcher = FakeFetcher {
            pages: vec![CANADA_AND_GERMANY, CANADA_AND_GERMANY, CANADA_AND_GERMANY],
            requested: Rc::clone(&requested),
        };
        let appended = Rc::new(RefCell::new(Vec::new()));
        let sink = RecordingSink {
            appended: Rc::clone(&appended),
        };
        let crawl = Crawl::new(Box::new(fetcher), Box::new(sink), Some(2));
        assert_eq!(crawl.count(), 4);
        assert_eq!(*requested.borrow(), vec![0, PAGE_SIZE]);
    }

    #[test]
    fn filtered_out_records_are_not_sunk_or_yielded() {
        let both = r#"<li><h3>Job D</h3>
            <span class="job-search-card__location">United States and Canada</span></li>"#;
        let (crawl, requested, appended) = crawl_with(vec![both, ""]);
        assert_eq!(crawl.count(), 0);
        assert!(appended.borrow().is_empty());
        // The page itself was non-empty, so pagination still advanced.
        assert_eq!(*requested.borrow(), vec![0, PAGE_SIZE]);
    }
}
