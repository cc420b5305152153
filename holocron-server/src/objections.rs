//! Objection monitor.
//!
//! Reads every open nomination and review page, classifies each unstruck
//! objection by age and pings once per level. Nearing-overdue pings go to
//! the nomination channel of the type; overdue ones go to its review board.
//! The ledger of pinged levels lives in the repository so a restart never
//! repeats a ping. The monitor only reads lifecycle state.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use tracing::{debug, error, info, warn};

use holocron_core::objection::{classify, escalation, parse_objections, Objection, ObjectionLevel};
use holocron_core::{NominationType, TypePolicy, UserName};

use crate::collaborators::bounded;
use crate::error::EngineError;
use crate::notifications::{DispatchDelay, NotificationPayload};
use crate::state_machine::interpreter::{page_url, InterpreterContext};
use crate::state_machine::store::LifecycleStore;

/// A page the monitor inspects.
#[derive(Debug, Clone)]
struct WatchedPage {
    title: String,
    kind: NominationType,
    /// "FAN" for nominations, "FA review" for reviews.
    label: String,
    /// Who answers unaddressed objections.
    owner: UserName,
}

/// Counts from one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectionReport {
    pub pages: usize,
    pub pings: usize,
    pub failures: Vec<String>,
}

/// One pending ping line, before grouping.
#[derive(Debug, Clone)]
struct Ping {
    fingerprint: String,
    level: ObjectionLevel,
    objector: String,
    addressed: bool,
}

pub struct ObjectionMonitor {
    store: Arc<LifecycleStore>,
    ctx: Arc<InterpreterContext>,
}

impl ObjectionMonitor {
    pub fn new(store: Arc<LifecycleStore>, ctx: Arc<InterpreterContext>) -> Self {
        Self { store, ctx }
    }

    async fn watched_pages(&self) -> Result<Vec<WatchedPage>, EngineError> {
        let mut pages: Vec<WatchedPage> = self
            .store
            .open_nominations()
            .await?
            .into_iter()
            .map(|n| WatchedPage {
                title: n.id.page_title(),
                kind: n.id.kind,
                label: format!("{}N", n.id.kind),
                owner: n.nominator,
            })
            .collect();
        for review in self.store.open_reviews().await? {
            let Some(owner) = review.requests.first().map(|r| r.requested_by.clone()) else {
                continue;
            };
            pages.push(WatchedPage {
                title: review.id.page_title(),
                kind: review.id.kind,
                label: format!("{} review", review.id.kind),
                owner,
            });
        }
        Ok(pages)
    }

    /// Inspect every open page once.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> ObjectionReport {
        let mut report = ObjectionReport::default();

        let pages = match self.watched_pages().await {
            Ok(pages) => pages,
            Err(e) => {
                error!("Could not list open nominations and reviews: {}", e);
                report.failures.push(format!("listing open pages: {}", e));
                self.report_failures(&report.failures, now).await;
                return report;
            }
        };

        for page in pages {
            match self.check_page(&page, now).await {
                Ok(pings) => {
                    report.pages += 1;
                    report.pings += pings;
                }
                Err(e) => {
                    warn!("Objection check of {} failed: {}", page.title, e);
                    report.failures.push(format!("{}: {}", page.title, e));
                }
            }
        }

        if !report.failures.is_empty() {
            self.report_failures(&report.failures, now).await;
        }
        report
    }

    /// Check one page. Returns the number of objections pinged.
    async fn check_page(&self, page: &WatchedPage, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let text = bounded(
            self.ctx.call_timeout,
            "read page for objections",
            self.ctx.wiki.get_page_content(&page.title),
        )
        .await?;
        let objections = parse_objections(&page.title, &text);
        let repo = self.store.repository();
        let ledger = repo.pinged_levels(&page.title).await?;

        let live: HashSet<&str> = objections
            .iter()
            .filter(|o| !o.struck)
            .map(|o| o.fingerprint.as_str())
            .collect();
        let gone: Vec<String> = ledger
            .keys()
            .filter(|fp| !live.contains(fp.as_str()))
            .cloned()
            .collect();
        if !gone.is_empty() {
            debug!("Forgetting {} struck or removed objections on {}", gone.len(), page.title);
            repo.forget_pings(&page.title, &gone).await?;
        }

        let policy = self.ctx.policy.get(page.kind);
        let pings: Vec<Ping> = objections
            .iter()
            .filter(|o| !o.struck)
            .filter_map(|o| {
                let level = escalation(ledger.get(&o.fingerprint).copied(), classify(o, policy, now))?;
                Some(ping_for(o, level))
            })
            .collect();
        if pings.is_empty() {
            return Ok(0);
        }

        let (overdue, nearing): (Vec<Ping>, Vec<Ping>) = pings
            .into_iter()
            .partition(|p| p.level == ObjectionLevel::Overdue);
        let header = format!("{}: <{}>", page.label, page_url(&self.ctx, &page.title));

        let mut sent = 0;
        if !nearing.is_empty() {
            let text = format!(
                "{}\n{}",
                header,
                nearing_lines(&nearing, &page.owner, policy).join("\n")
            );
            let channel = self.ctx.channels.nominations.get(page.kind);
            sent += self.send(page, channel, text, &nearing, now).await?;
        }
        if !overdue.is_empty() {
            let text = format!("{}\n{}", header, overdue_lines(&overdue, policy).join("\n"));
            let channel = self.ctx.channels.boards.get(page.kind);
            sent += self.send(page, channel, text, &overdue, now).await?;
        }
        Ok(sent)
    }

    /// Queue one ping message, then record every level it covers.
    async fn send(
        &self,
        page: &WatchedPage,
        channel: &str,
        text: String,
        pings: &[Ping],
        now: DateTime<Utc>,
    ) -> Result<usize, EngineError> {
        let mut fingerprints: Vec<&str> = pings.iter().map(|p| p.fingerprint.as_str()).collect();
        fingerprints.sort_unstable();
        let dedupe_key = format!(
            "ping:{}:{}:{}",
            pings[0].level.as_str(),
            page.title,
            fingerprints.join(",")
        );
        self.ctx
            .queue
            .enqueue(
                NotificationPayload::chat(channel, text),
                DispatchDelay::Immediate,
                Some(dedupe_key),
                now,
            )
            .await?;

        let repo = self.store.repository();
        for ping in pings {
            repo.record_ping(&page.title, &ping.fingerprint, ping.level, now)
                .await?;
        }
        info!(
            "Pinged {} {} objection(s) on {}",
            pings.len(),
            pings[0].level.as_str(),
            page.title
        );
        Ok(pings.len())
    }

    async fn report_failures(&self, failures: &[String], now: DateTime<Utc>) {
        let text = format!(
            "Objection check finished with {} problem(s):\n{}",
            failures.len(),
            failures
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n")
        );
        if let Err(e) = self
            .ctx
            .queue
            .enqueue(
                NotificationPayload::chat(&self.ctx.channels.operators, text),
                DispatchDelay::Immediate,
                None,
                now,
            )
            .await
        {
            error!("Could not queue the objection report for operators: {}", e);
        }
    }

    /// Run a pass every `interval`, plus one each day at `pass_hour` local time.
    pub async fn run(self: Arc<Self>, interval: Duration, pass_hour: u32, utc_offset_hours: i32) {
        let mut last_full = Utc::now();
        let report = self.run_pass(last_full).await;
        info!(
            "Objection pass: {} pages, {} pings, {} failure(s)",
            report.pages,
            report.pings,
            report.failures.len()
        );

        loop {
            let now = Utc::now();
            let next = next_pass_after(now, last_full, interval, pass_hour, utc_offset_hours);
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            let at = Utc::now();
            if at >= last_full + interval {
                last_full = at;
            }
            let report = self.run_pass(at).await;
            info!(
                "Objection pass: {} pages, {} pings, {} failure(s)",
                report.pages,
                report.pings,
                report.failures.len()
            );
        }
    }
}

fn ping_for(objection: &Objection, level: ObjectionLevel) -> Ping {
    Ping {
        fingerprint: objection.fingerprint.clone(),
        level,
        objector: objection
            .raised_by
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "an unsigned reviewer".to_string()),
        addressed: objection.is_addressed(),
    }
}

fn state(addressed: bool) -> &'static str {
    if addressed {
        "addressed"
    } else {
        "unaddressed"
    }
}

/// Group per (objector, addressed) and address each line to whoever has
/// to act: the objector for addressed objections, the owner otherwise.
fn nearing_lines(pings: &[Ping], owner: &UserName, policy: &TypePolicy) -> Vec<String> {
    let mut grouped: BTreeMap<(&str, bool), usize> = BTreeMap::new();
    for ping in pings {
        *grouped
            .entry((ping.objector.as_str(), ping.addressed))
            .or_default() += 1;
    }
    grouped
        .into_iter()
        .map(|((objector, addressed), count)| {
            if addressed {
                format!(
                    "- {}: {} of your objections have been addressed for {} days",
                    objector, count, policy.notification_days
                )
            } else {
                format!(
                    "- {}: {} objection(s) from {} have been unaddressed for {} days",
                    owner, count, objector, policy.notification_days
                )
            }
        })
        .collect()
}

fn overdue_lines(pings: &[Ping], policy: &TypePolicy) -> Vec<String> {
    let mut grouped: BTreeMap<(&str, bool), usize> = BTreeMap::new();
    for ping in pings {
        *grouped
            .entry((ping.objector.as_str(), ping.addressed))
            .or_default() += 1;
    }
    grouped
        .into_iter()
        .map(|((objector, addressed), count)| {
            format!(
                "- {} objection(s) from {} have been {} for {} days",
                count,
                objector,
                state(addressed),
                policy.overdue_days
            )
        })
        .collect()
}

/// The earlier of the next periodic pass and the next mid-cycle pass at
/// `pass_hour` in the configured UTC offset.
pub fn next_pass_after(
    now: DateTime<Utc>,
    last_full: DateTime<Utc>,
    interval: Duration,
    pass_hour: u32,
    utc_offset_hours: i32,
) -> DateTime<Utc> {
    let periodic = last_full + interval;
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
    let local_day = now.with_timezone(&offset).date_naive();

    let mid_cycle = [local_day, local_day + Duration::days(1)]
        .into_iter()
        .filter_map(|day| day.and_hms_opt(pass_hour, 0, 0))
        .filter_map(|naive| offset.from_local_datetime(&naive).single())
        .map(|local| local.with_timezone(&Utc))
        .find(|at| *at > now);

    match mid_cycle {
        Some(mid) if mid < periodic => mid,
        _ => periodic,
    }
}
