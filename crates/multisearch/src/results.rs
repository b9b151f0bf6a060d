//! Lazy, paginated search results and document listings.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::Stream;
use multisearch_core::{DocId, Driver, Error, NativeQuery, Result, SearchHit, StoredDocument};

/// Ranked hits of one search, fetched from the driver a page at a time.
///
/// The iterator covers the window `offset..offset + limit` of the ranked
/// matches. It is not restartable: once it has yielded its last hit it stays
/// finished and never re-issues the search. Iterate again by calling
/// [`SearchClient::search`](crate::SearchClient::search) again.
pub struct ResultIterator {
    driver: Arc<dyn Driver>,
    query: NativeQuery,
    closed: Arc<AtomicBool>,
    offset: usize,
    remaining: usize,
    page_size: usize,
    buffer: VecDeque<SearchHit>,
    total: Option<usize>,
    finished: bool,
}

impl ResultIterator {
    pub(crate) fn new(
        driver: Arc<dyn Driver>,
        query: NativeQuery,
        closed: Arc<AtomicBool>,
        offset: usize,
        limit: usize,
        page_size: usize,
    ) -> Self {
        Self {
            driver,
            query,
            closed,
            offset,
            remaining: limit,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            total: None,
            finished: limit == 0,
        }
    }

    /// Next hit, fetching another page when the buffered one runs out.
    ///
    /// # Errors
    ///
    /// - `ClientClosed` when the client was closed before the page was fetched
    /// - `QueryError` or `DriverTimeout` from the driver
    pub async fn next(&mut self) -> Result<Option<SearchHit>> {
        if let Some(hit) = self.buffer.pop_front() {
            return Ok(Some(hit));
        }
        if self.finished {
            return Ok(None);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ClientClosed);
        }

        let want = self.remaining.min(self.page_size);
        let page = self.driver.search(&self.query, self.offset, want).await?;
        if page.total.is_some() {
            self.total = page.total;
        }
        let got = page.hits.len().min(want);
        log::debug!("Fetched {got} hit(s) at offset {}", self.offset);
        self.offset += got;
        self.remaining -= got;
        if got < want || self.remaining == 0 {
            self.finished = true;
        }
        self.buffer.extend(page.hits.into_iter().take(want));
        Ok(self.buffer.pop_front())
    }

    /// Total number of matches, once a page has been fetched and the backend
    /// reports it.
    pub fn total(&self) -> Option<usize> {
        self.total
    }

    /// Whether every hit of the window has been yielded.
    pub fn is_finished(&self) -> bool {
        self.finished && self.buffer.is_empty()
    }

    /// Drain the remaining hits.
    pub async fn collect_all(mut self) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        while let Some(hit) = self.next().await? {
            hits.push(hit);
        }
        Ok(hits)
    }

    /// The remaining hits as a stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<SearchHit>> + Send {
        futures::stream::try_unfold(self, |mut it| async move {
            Ok(it.next().await?.map(|hit| (hit, it)))
        })
    }
}

impl std::fmt::Debug for ResultIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultIterator")
            .field("backend", &self.driver.name())
            .field("query", &self.query.repr())
            .field("offset", &self.offset)
            .field("remaining", &self.remaining)
            .field("buffered", &self.buffer.len())
            .field("finished", &self.finished)
            .finish()
    }
}

/// Every visible document of a store, fetched a page of ids at a time.
///
/// Documents come in the driver's listing order. Writes made while iterating
/// may be skipped or seen twice; a document deleted between listing and
/// loading is skipped.
pub struct DocumentIterator {
    driver: Arc<dyn Driver>,
    closed: Arc<AtomicBool>,
    offset: usize,
    page_size: usize,
    buffer: VecDeque<DocId>,
    finished: bool,
}

impl DocumentIterator {
    pub(crate) fn new(driver: Arc<dyn Driver>, closed: Arc<AtomicBool>, page_size: usize) -> Self {
        Self {
            driver,
            closed,
            offset: 0,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            finished: false,
        }
    }

    /// Next document, listing another page of ids when needed.
    ///
    /// # Errors
    ///
    /// - `ClientClosed` when the client was closed in the meantime
    /// - anything the driver returns while listing or loading
    pub async fn next(&mut self) -> Result<Option<StoredDocument>> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::ClientClosed);
            }
            if let Some(id) = self.buffer.pop_front() {
                match self.driver.get_document(&id).await? {
                    Some(doc) => return Ok(Some(doc)),
                    None => continue,
                }
            }
            if self.finished {
                return Ok(None);
            }
            let ids = self.driver.document_ids(self.offset, self.page_size).await?;
            log::debug!("Listed {} document id(s) at offset {}", ids.len(), self.offset);
            self.offset += ids.len();
            if ids.len() < self.page_size {
                self.finished = true;
            }
            self.buffer.extend(ids);
        }
    }

    /// Drain the remaining documents.
    pub async fn collect_all(mut self) -> Result<Vec<StoredDocument>> {
        let mut docs = Vec::new();
        while let Some(doc) = self.next().await? {
            docs.push(doc);
        }
        Ok(docs)
    }

    /// The remaining documents as a stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<StoredDocument>> + Send {
        futures::stream::try_unfold(self, |mut it| async move {
            Ok(it.next().await?.map(|doc| (doc, it)))
        })
    }
}

impl std::fmt::Debug for DocumentIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIterator")
            .field("backend", &self.driver.name())
            .field("offset", &self.offset)
            .field("buffered", &self.buffer.len())
            .field("finished", &self.finished)
            .finish()
    }
}
