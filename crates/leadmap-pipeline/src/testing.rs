//! Scripted collaborator fakes for tests.
//!
//! [`FakeDriver`] simulates an automation session over a scripted feed of
//! [`FakeListing`]s, including incremental scrolling, feed reflow, detail
//! click-through, and injectable transient failures. [`FakeStore`] is an
//! in-memory [`ResultStore`] that enforces the same uniqueness backstop a
//! real backend would. Neither performs any I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use leadmap_core::{LeadRecord, MergePlan, NewLead};

use crate::driver::{AutomationDriver, ElementHandle, SelectorSpec, ATTR_HREF, ATTR_LABEL};
use crate::error::PipelineError;
use crate::store::ResultStore;

/// Handle ids below this are listing slots; at or above, allocated parts.
const PART_ID_BASE: u64 = 1_000;

/// One scripted listing in the fake feed.
#[derive(Debug, Clone)]
pub struct FakeListing {
    /// Accessible label of the deep-link anchor.
    pub label: Option<String>,
    /// Href of the deep-link anchor.
    pub deep_link: Option<String>,
    /// Labels of inline action affordances, in render order.
    pub action_labels: Vec<String>,
    /// Href behind the "Website" action affordance.
    pub website_action_href: Option<String>,
    /// Href of an anchor labelled "Website" without an affordance.
    pub website_label_href: Option<String>,
    /// Text of a heading-role element.
    pub heading: Option<String>,
    /// Text of a semantic heading tag.
    pub heading_tag: Option<String>,
    /// Accessible label of the star badge.
    pub star_label: Option<String>,
    /// Visible text of the whole listing subtree.
    pub visible_text: String,
    /// Website revealed only inside the detail view.
    pub detail_website: Option<String>,
}

impl FakeListing {
    /// Standard-layout listing: inline affordances, rating badge, phone.
    #[must_use]
    pub fn standard(name: &str, website: Option<&str>) -> Self {
        let slug = name.to_lowercase().replace(' ', "-");
        let mut action_labels = vec!["Directions".to_string()];
        if website.is_some() {
            action_labels.insert(0, "Website".to_string());
        }
        Self {
            label: Some(format!("{name} · 5.0 stars 52 Reviews")),
            deep_link: Some(format!("https://www.google.com/maps/place/{slug}")),
            action_labels,
            website_action_href: website.map(ToString::to_string),
            website_label_href: None,
            heading: None,
            heading_tag: None,
            star_label: Some("5.0 stars 52 Reviews".to_string()),
            visible_text: format!("{name}\n(402) 543-3239\nOpen · Closes 5 PM"),
            detail_website: None,
        }
    }

    /// Compact-layout listing: deep link only, no affordances, no phone.
    #[must_use]
    pub fn compact(name: &str) -> Self {
        let slug = name.to_lowercase().replace(' ', "-");
        Self {
            label: Some(name.to_string()),
            deep_link: Some(format!("https://www.google.com/maps/place/{slug}")),
            action_labels: Vec::new(),
            website_action_href: None,
            website_label_href: None,
            heading: None,
            heading_tag: None,
            star_label: None,
            visible_text: name.to_string(),
            detail_website: None,
        }
    }
}

/// Sub-element kinds a part handle can point at.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    DeepLink,
    Action(String),
    Star,
    HeadingRole,
    HeadingTag,
    WebsiteLabelAnchor,
    DetailWebsite,
    DetailRoot,
}

#[derive(Debug, Clone)]
struct PartRef {
    slot: usize,
    part: Part,
}

struct FakeDriverState {
    listings: Vec<FakeListing>,
    /// Feed order as slot indices; reflow mutates this without invalidating
    /// slot-addressed handles.
    order: Vec<usize>,
    visible: usize,
    scroll_step: usize,
    scroll_offset: i64,
    opened: Option<usize>,
    parts: HashMap<u64, PartRef>,
    next_part_id: u64,
    fail_listing_reads: u32,
    fail_detail_root: bool,
    calls: u64,
}

/// Scripted [`AutomationDriver`] over an in-memory feed.
pub struct FakeDriver {
    state: Mutex<FakeDriverState>,
}

impl FakeDriver {
    /// Feed with every listing already rendered; scrolling finds nothing new.
    #[must_use]
    pub fn new(listings: Vec<FakeListing>) -> Self {
        let visible = listings.len();
        Self::build(listings, visible, 0)
    }

    /// Feed that renders `initial` listings up front and `step` more per
    /// scroll.
    #[must_use]
    pub fn with_window(listings: Vec<FakeListing>, initial: usize, step: usize) -> Self {
        let visible = initial.min(listings.len());
        Self::build(listings, visible, step)
    }

    fn build(listings: Vec<FakeListing>, visible: usize, scroll_step: usize) -> Self {
        let order = (0..listings.len()).collect();
        Self {
            state: Mutex::new(FakeDriverState {
                listings,
                order,
                visible,
                scroll_step,
                scroll_offset: 0,
                opened: None,
                parts: HashMap::new(),
                next_part_id: PART_ID_BASE,
                fail_listing_reads: 0,
                fail_detail_root: false,
                calls: 0,
            }),
        }
    }

    /// Make the next `n` calls to `current_listings` fail transiently.
    pub fn inject_listing_failures(&self, n: u32) {
        self.lock().fail_listing_reads = n;
    }

    /// Make `detail_root` fail, simulating a detail pane that never renders.
    pub fn fail_detail_root(&self) {
        self.lock().fail_detail_root = true;
    }

    /// Insert a listing at the front of the feed, shifting every existing
    /// position — the reflow case the scroll tracker must survive.
    pub fn reflow_prepend(&self, listing: FakeListing) {
        let mut state = self.lock();
        let slot = state.listings.len();
        state.listings.push(listing);
        state.order.insert(0, slot);
        state.visible += 1;
    }

    /// True when a detail view is currently open.
    #[must_use]
    pub fn detail_open(&self) -> bool {
        self.lock().opened.is_some()
    }

    /// Total driver calls made, for call-count assertions.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.lock().calls
    }

    #[allow(clippy::missing_panics_doc)]
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeDriverState> {
        self.state.lock().expect("fake driver lock poisoned")
    }

    fn part_handle(state: &mut FakeDriverState, slot: usize, part: Part) -> ElementHandle {
        // Reuse an existing handle for the same (slot, part) pair.
        for (id, part_ref) in &state.parts {
            if part_ref.slot == slot && part_ref.part == part {
                return ElementHandle::new(*id);
            }
        }
        let id = state.next_part_id;
        state.next_part_id += 1;
        state.parts.insert(id, PartRef { slot, part });
        ElementHandle::new(id)
    }

    fn resolve(state: &FakeDriverState, handle: &ElementHandle) -> Option<PartRef> {
        if handle.id < PART_ID_BASE {
            let slot = usize::try_from(handle.id).ok()?;
            state.listings.get(slot)?;
            // A bare listing slot; modeled as a part-less ref.
            return Some(PartRef {
                slot,
                part: Part::DetailRoot,
            });
        }
        state.parts.get(&handle.id).cloned()
    }

    fn is_listing_root(handle: &ElementHandle) -> bool {
        handle.id < PART_ID_BASE
    }
}

#[async_trait]
impl AutomationDriver for FakeDriver {
    async fn current_listings(&self) -> Result<Vec<ElementHandle>, PipelineError> {
        let mut state = self.lock();
        state.calls += 1;
        if state.fail_listing_reads > 0 {
            state.fail_listing_reads -= 1;
            return Err(PipelineError::DriverUnavailable {
                reason: "injected listing read failure".to_string(),
            });
        }
        let visible = state.visible.min(state.order.len());
        Ok(state.order[..visible]
            .iter()
            .map(|slot| ElementHandle::new(*slot as u64))
            .collect())
    }

    async fn scroll(&self) -> Result<bool, PipelineError> {
        let mut state = self.lock();
        state.calls += 1;
        state.scroll_offset += 100;
        let total = state.order.len();
        if state.visible < total {
            state.visible = (state.visible + state.scroll_step.max(1)).min(total);
        }
        Ok(state.visible < total)
    }

    async fn scroll_offset(&self) -> Result<i64, PipelineError> {
        Ok(self.lock().scroll_offset)
    }

    async fn restore_scroll(&self, offset: i64) -> Result<(), PipelineError> {
        self.lock().scroll_offset = offset;
        Ok(())
    }

    async fn read_attribute(
        &self,
        handle: &ElementHandle,
        key: &str,
    ) -> Result<Option<String>, PipelineError> {
        let mut state = self.lock();
        state.calls += 1;
        let Some(part_ref) = Self::resolve(&state, handle) else {
            return Err(PipelineError::DriverUnavailable {
                reason: format!("stale element handle {}", handle.id),
            });
        };
        let listing = &state.listings[part_ref.slot];

        let value = match (&part_ref.part, key) {
            (Part::DeepLink, ATTR_LABEL) => listing.label.clone(),
            (Part::DeepLink, ATTR_HREF) => listing.deep_link.clone(),
            (Part::Action(label), ATTR_LABEL) => Some(label.clone()),
            (Part::Action(label), ATTR_HREF) if label == "Website" => {
                listing.website_action_href.clone()
            }
            (Part::Star, ATTR_LABEL) => listing.star_label.clone(),
            (Part::WebsiteLabelAnchor, ATTR_LABEL) => Some("Website".to_string()),
            (Part::WebsiteLabelAnchor, ATTR_HREF) => listing.website_label_href.clone(),
            (Part::DetailWebsite, ATTR_HREF) => listing.detail_website.clone(),
            _ => None,
        };
        Ok(value)
    }

    async fn read_text(&self, handle: &ElementHandle) -> Result<String, PipelineError> {
        let mut state = self.lock();
        state.calls += 1;
        let Some(part_ref) = Self::resolve(&state, handle) else {
            return Err(PipelineError::DriverUnavailable {
                reason: format!("stale element handle {}", handle.id),
            });
        };
        let listing = &state.listings[part_ref.slot];
        let text = if Self::is_listing_root(handle) {
            listing.visible_text.clone()
        } else {
            match part_ref.part {
                Part::HeadingRole => listing.heading.clone().unwrap_or_default(),
                Part::HeadingTag => listing.heading_tag.clone().unwrap_or_default(),
                _ => String::new(),
            }
        };
        Ok(text)
    }

    async fn find_within(
        &self,
        handle: &ElementHandle,
        selector: &SelectorSpec,
    ) -> Result<Vec<ElementHandle>, PipelineError> {
        let mut state = self.lock();
        state.calls += 1;
        let Some(part_ref) = Self::resolve(&state, handle) else {
            return Err(PipelineError::DriverUnavailable {
                reason: format!("stale element handle {}", handle.id),
            });
        };
        let slot = part_ref.slot;
        let listing = state.listings[slot].clone();

        // Inside the detail view, only the website anchor is modeled.
        let in_detail = !Self::is_listing_root(handle) && part_ref.part == Part::DetailRoot;
        if in_detail {
            let found = match selector {
                SelectorSpec::ActionLabel(l) if l == "Website" => listing.detail_website.is_some(),
                SelectorSpec::WebsiteLabelAnchor => listing.detail_website.is_some(),
                _ => false,
            };
            if found {
                return Ok(vec![Self::part_handle(&mut state, slot, Part::DetailWebsite)]);
            }
            return Ok(Vec::new());
        }

        let handles = match selector {
            SelectorSpec::ActionLabel(label) => {
                if listing.action_labels.iter().any(|l| l == label) {
                    vec![Self::part_handle(
                        &mut state,
                        slot,
                        Part::Action(label.clone()),
                    )]
                } else {
                    Vec::new()
                }
            }
            SelectorSpec::DeepLink => {
                if listing.deep_link.is_some() {
                    vec![Self::part_handle(&mut state, slot, Part::DeepLink)]
                } else {
                    Vec::new()
                }
            }
            SelectorSpec::HeadingRole => {
                if listing.heading.is_some() {
                    vec![Self::part_handle(&mut state, slot, Part::HeadingRole)]
                } else {
                    Vec::new()
                }
            }
            SelectorSpec::HeadingTag => {
                if listing.heading_tag.is_some() {
                    vec![Self::part_handle(&mut state, slot, Part::HeadingTag)]
                } else {
                    Vec::new()
                }
            }
            SelectorSpec::StarImage => {
                if listing.star_label.is_some() {
                    vec![Self::part_handle(&mut state, slot, Part::Star)]
                } else {
                    Vec::new()
                }
            }
            SelectorSpec::WebsiteLabelAnchor => {
                if listing.website_label_href.is_some() {
                    vec![Self::part_handle(
                        &mut state,
                        slot,
                        Part::WebsiteLabelAnchor,
                    )]
                } else {
                    Vec::new()
                }
            }
        };
        Ok(handles)
    }

    async fn open(&self, handle: &ElementHandle) -> Result<(), PipelineError> {
        let mut state = self.lock();
        state.calls += 1;
        let Some(part_ref) = Self::resolve(&state, handle) else {
            return Err(PipelineError::DriverUnavailable {
                reason: format!("stale element handle {}", handle.id),
            });
        };
        state.opened = Some(part_ref.slot);
        // Opening a detail view resets the feed's scroll position.
        state.scroll_offset = 0;
        Ok(())
    }

    async fn back(&self) -> Result<(), PipelineError> {
        let mut state = self.lock();
        state.calls += 1;
        state.opened = None;
        Ok(())
    }

    async fn detail_root(&self) -> Result<ElementHandle, PipelineError> {
        let mut state = self.lock();
        state.calls += 1;
        if state.fail_detail_root {
            return Err(PipelineError::DriverUnavailable {
                reason: "detail pane never rendered".to_string(),
            });
        }
        let Some(slot) = state.opened else {
            return Err(PipelineError::DriverUnavailable {
                reason: "no detail view is open".to_string(),
            });
        };
        Ok(Self::part_handle(&mut state, slot, Part::DetailRoot))
    }
}

// ---------------------------------------------------------------------------
// In-memory result store
// ---------------------------------------------------------------------------

struct FakeStoreState {
    leads: Vec<LeadRecord>,
    next_id: i64,
    fail_inserts: u32,
    fail_finds: u32,
}

/// In-memory [`ResultStore`] with the uniqueness backstop a real backend
/// enforces at the schema level.
pub struct FakeStore {
    state: Mutex<FakeStoreState>,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeStoreState {
                leads: Vec::new(),
                next_id: 1,
                fail_inserts: 0,
                fail_finds: 0,
            }),
        }
    }

    /// Make the next `n` inserts fail as a store outage (not a conflict).
    pub fn inject_insert_failures(&self, n: u32) {
        self.lock().fail_inserts = n;
    }

    /// Make the next `n` lookups fail as a store outage.
    pub fn inject_find_failures(&self, n: u32) {
        self.lock().fail_finds = n;
    }

    /// Snapshot of every persisted lead, for assertions.
    #[must_use]
    pub fn records(&self) -> Vec<LeadRecord> {
        self.lock().leads.clone()
    }

    #[allow(clippy::missing_panics_doc)]
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeStoreState> {
        self.state.lock().expect("fake store lock poisoned")
    }

    fn check_find_failure(&self) -> Result<(), PipelineError> {
        let mut state = self.lock();
        if state.fail_finds > 0 {
            state.fail_finds -= 1;
            return Err(PipelineError::Store {
                reason: "injected lookup failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStore for FakeStore {
    async fn find_by_name_location(
        &self,
        name: &str,
        location: &str,
    ) -> Result<Option<LeadRecord>, PipelineError> {
        self.check_find_failure()?;
        let name = name.to_lowercase();
        let location = location.to_lowercase();
        Ok(self
            .lock()
            .leads
            .iter()
            .find(|l| l.name.to_lowercase() == name && l.location.to_lowercase() == location)
            .cloned())
    }

    async fn find_by_profile_url(
        &self,
        profile_url: &str,
    ) -> Result<Option<LeadRecord>, PipelineError> {
        self.check_find_failure()?;
        Ok(self
            .lock()
            .leads
            .iter()
            .find(|l| l.profile_url.as_deref() == Some(profile_url))
            .cloned())
    }

    async fn find_by_phone_location(
        &self,
        phone: &str,
        location: &str,
    ) -> Result<Option<LeadRecord>, PipelineError> {
        self.check_find_failure()?;
        let location = location.to_lowercase();
        Ok(self
            .lock()
            .leads
            .iter()
            .find(|l| {
                l.phone.as_deref() == Some(phone) && l.location.to_lowercase() == location
            })
            .cloned())
    }

    async fn insert(&self, lead: &NewLead) -> Result<LeadRecord, PipelineError> {
        let mut state = self.lock();
        if state.fail_inserts > 0 {
            state.fail_inserts -= 1;
            return Err(PipelineError::Store {
                reason: "injected insert failure".to_string(),
            });
        }
        let conflict = state.leads.iter().any(|l| {
            l.identity_key == lead.identity_key
                || (l.profile_url.is_some() && l.profile_url == lead.profile_url)
        });
        if conflict {
            return Err(PipelineError::StoreConflict {
                identity_key: lead.identity_key.clone(),
            });
        }

        let now = Utc::now();
        let record = LeadRecord {
            id: state.next_id,
            public_id: Uuid::new_v4(),
            identity_key: lead.identity_key.clone(),
            name: lead.name.clone(),
            location: lead.location.clone(),
            rating: lead.rating,
            review_count: lead.review_count,
            phone: lead.phone.clone(),
            website: lead.website.clone(),
            has_website: lead.has_website,
            profile_url: lead.profile_url.clone(),
            source: lead.source.clone(),
            first_seen_at: now,
            last_seen_at: now,
            created_at: now,
        };
        state.next_id += 1;
        state.leads.push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: i64, plan: &MergePlan) -> Result<LeadRecord, PipelineError> {
        let mut state = self.lock();
        let Some(lead) = state.leads.iter_mut().find(|l| l.id == id) else {
            return Err(PipelineError::Store {
                reason: format!("no lead with id {id}"),
            });
        };
        if let Some(rating) = plan.rating {
            lead.rating = Some(rating);
        }
        if let Some(review_count) = plan.review_count {
            lead.review_count = Some(review_count);
        }
        if let Some(phone) = &plan.phone {
            lead.phone = Some(phone.clone());
        }
        if let Some(website) = &plan.website {
            lead.website = Some(website.clone());
            lead.has_website = true;
        }
        if let Some(profile_url) = &plan.profile_url {
            lead.profile_url = Some(profile_url.clone());
        }
        lead.last_seen_at = Utc::now();
        Ok(lead.clone())
    }
}
