//! The queue mutation service.
//!
//! Every operation runs inside one transaction: begin, read, decide through
//! the policy engine, write, commit. Events are collected into a pending
//! buffer along the way and handed to the bus only after the commit
//! succeeds, so a subscriber never observes a state change that rolls back.

use chrono::{Datelike, Local, Utc};
use ohq_domain::{
    Announcement, AnnouncementRequest, ApiError, BROADCAST_RECEIVER, ConfigurationUpdateRequest,
    CreateQueueRequest, EntryUpdateRequest, Envelope, EventKind, Message, MessageRequest, Queue,
    QueueConfiguration, QueueEntry, QueueType, QueueUpdateRequest, SessionIdentity, SignupRequest,
    Tid, policy,
};
use ohq_storage::{
    CourseRepository, EntryRepository, NewEntry, QueueRepository, RosterRepository,
};
use serde_json::json;
use sqlx::{PgConnection, PgPool};

use crate::bus::{EventBus, admin_topic, email_topic, generic_topic, nonpriv_topic};
use crate::capabilities;

/// Events queued up inside a transaction, flushed to the bus after commit.
type PendingEvents = Vec<(String, Envelope)>;

/// Number of archived entries returned in the admin stack.
pub const STACK_LIMIT: i64 = 20;

#[derive(Clone)]
pub struct QueueService {
    pool: PgPool,
    pub queues: QueueRepository,
    pub entries: EntryRepository,
    pub roster: RosterRepository,
    pub courses: CourseRepository,
    bus: EventBus,
    site_admin_groups: Vec<String>,
}

impl QueueService {
    pub fn new(pool: PgPool, bus: EventBus, site_admin_groups: Vec<String>) -> Self {
        Self {
            pool,
            queues: QueueRepository::new(),
            entries: EntryRepository::new(),
            roster: RosterRepository::new(),
            courses: CourseRepository::new(),
            bus,
            site_admin_groups,
        }
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, ApiError> {
        self.pool.begin().await.map_err(ApiError::internal)
    }

    async fn commit_and_publish(
        &self,
        tx: sqlx::Transaction<'static, sqlx::Postgres>,
        events: PendingEvents,
    ) -> Result<(), ApiError> {
        tx.commit().await.map_err(ApiError::internal)?;
        self.bus.publish_all(events);
        Ok(())
    }

    pub async fn is_course_admin(
        &self,
        conn: &mut PgConnection,
        course: Tid,
        viewer: &SessionIdentity,
    ) -> Result<bool, ApiError> {
        Ok(capabilities::is_course_admin(
            &self.courses,
            conn,
            course,
            viewer,
            &self.site_admin_groups,
        )
        .await?)
    }

    pub async fn is_site_admin(
        &self,
        conn: &mut PgConnection,
        viewer: &SessionIdentity,
    ) -> Result<bool, ApiError> {
        Ok(
            capabilities::is_site_admin(&self.courses, conn, viewer, &self.site_admin_groups)
                .await?,
        )
    }

    async fn require_course_admin(
        &self,
        conn: &mut PgConnection,
        queue: &Queue,
        viewer: &SessionIdentity,
    ) -> Result<(), ApiError> {
        if self.is_course_admin(conn, queue.course, viewer).await? {
            Ok(())
        } else {
            Err(ApiError::Forbidden("course admin required".to_string()))
        }
    }

    /// Open/half-hour status of a queue: `(open, half_hour, today's schedule)`.
    pub async fn open_status(
        &self,
        conn: &mut PgConnection,
        config: &QueueConfiguration,
    ) -> Result<(bool, usize, String), ApiError> {
        let now = Local::now();
        let half_hour = policy::half_hour_index(&now);
        let weekday = now.weekday().num_days_from_sunday() as usize;
        let week = self.queues.get_schedule(conn, config.id).await?;
        let today = week
            .get(weekday)
            .cloned()
            .unwrap_or_else(|| "c".repeat(policy::SLOTS_PER_DAY));
        let open = policy::is_open(config, &today, half_hour);
        Ok((open, half_hour, today))
    }

    /// Place a student on the queue.
    pub async fn signup(
        &self,
        queue_id: Tid,
        viewer: &SessionIdentity,
        req: SignupRequest,
    ) -> Result<QueueEntry, ApiError> {
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        if queue.queue_type != QueueType::Ordered {
            return Err(ApiError::Validation(
                "this queue does not take sign-ups".to_string(),
            ));
        }
        let config = self.queues.get_configuration(tx.as_mut(), queue_id).await?;

        if self
            .entries
            .active_entry_for(tx.as_mut(), queue_id, &viewer.email)
            .await?
            .is_some()
        {
            return Err(ApiError::Conflict(
                "you already have an entry on this queue".to_string(),
            ));
        }

        let is_admin = self.is_course_admin(tx.as_mut(), queue.course, viewer).await?;
        let (open, _, _) = self.open_status(tx.as_mut(), &config).await?;
        let ctx = policy::SignupContext {
            is_admin,
            open,
            registered: if config.prevent_unregistered {
                self.roster
                    .in_roster(tx.as_mut(), queue_id, &viewer.email)
                    .await?
            } else {
                true
            },
            teammate_active: if config.prevent_groups {
                self.roster
                    .teammate_has_active_entry(tx.as_mut(), queue_id, &viewer.email)
                    .await?
            } else {
                false
            },
            last_helped: if config.cooldown_seconds > 0 {
                self.entries
                    .last_helped_time(tx.as_mut(), queue_id, &viewer.email)
                    .await?
            } else {
                None
            },
        };
        policy::can_sign_up(&config, &ctx, Utc::now())
            .map_err(|denial| ApiError::Forbidden(denial.message()))?;

        policy::validate_description(&config.prompts, &req.description)
            .map_err(ApiError::Validation)?;
        policy::validate_location(&req.location).map_err(ApiError::Validation)?;

        let priority = if config.prioritize_new {
            let day_start = Tid::start_of_day(Local::now());
            let helped_today = self
                .entries
                .helped_today(tx.as_mut(), queue_id, &viewer.email, day_start)
                .await?;
            let teammate_helped_today = if config.prevent_groups_boost && !helped_today {
                self.entries
                    .teammate_helped_today(tx.as_mut(), queue_id, &viewer.email, day_start)
                    .await?
            } else {
                false
            };
            policy::new_entry_priority(&config, helped_today, teammate_helped_today)
        } else {
            0
        };

        let entry = self
            .entries
            .insert(
                tx.as_mut(),
                NewEntry {
                    queue: queue_id,
                    email: viewer.email.clone(),
                    name: viewer.name.clone(),
                    description: req.description,
                    location: req.location,
                    priority,
                },
            )
            .await
            .map_err(|err| match err {
                ohq_storage::StorageError::Conflict => ApiError::Conflict(
                    "you already have an entry on this queue".to_string(),
                ),
                other => other.into(),
            })?;

        let events = vec![
            (
                admin_topic(queue_id),
                Envelope::new(EventKind::EntryCreate, &entry),
            ),
            (
                nonpriv_topic(queue_id),
                Envelope::new(EventKind::EntryCreate, entry.anonymized()),
            ),
            (
                email_topic(queue_id, &entry.email),
                Envelope::new(EventKind::EntryUpdate, &entry),
            ),
        ];
        self.commit_and_publish(tx, events).await?;

        tracing::info!(queue = %queue_id, entry = %entry.id, priority, "entry created");
        Ok(entry)
    }

    /// Owner edits to an active entry's description and location.
    pub async fn update_entry(
        &self,
        queue_id: Tid,
        entry_id: Tid,
        viewer: &SessionIdentity,
        req: EntryUpdateRequest,
    ) -> Result<QueueEntry, ApiError> {
        let mut tx = self.begin().await?;
        let _queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        let existing = self.entries.get(tx.as_mut(), queue_id, entry_id).await?;
        if existing.email != viewer.email {
            return Err(ApiError::Forbidden(
                "only the entry owner may update it".to_string(),
            ));
        }

        let config = self.queues.get_configuration(tx.as_mut(), queue_id).await?;
        policy::validate_description(&config.prompts, &req.description)
            .map_err(ApiError::Validation)?;
        policy::validate_location(&req.location).map_err(ApiError::Validation)?;

        let entry = self
            .entries
            .update(tx.as_mut(), queue_id, entry_id, &req.description, &req.location)
            .await?;

        let events = vec![
            (
                admin_topic(queue_id),
                Envelope::new(EventKind::EntryUpdate, &entry),
            ),
            (
                email_topic(queue_id, &entry.email),
                Envelope::new(EventKind::EntryUpdate, &entry),
            ),
        ];
        self.commit_and_publish(tx, events).await?;
        Ok(entry)
    }

    /// Archive an entry; staff removal or a student giving up their spot.
    pub async fn remove_entry(
        &self,
        queue_id: Tid,
        entry_id: Tid,
        viewer: &SessionIdentity,
    ) -> Result<(), ApiError> {
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        let existing = self.entries.get(tx.as_mut(), queue_id, entry_id).await?;

        let is_owner = existing.email == viewer.email;
        if !is_owner {
            self.require_course_admin(tx.as_mut(), &queue, viewer).await?;
        }

        let entry = self
            .entries
            .remove(tx.as_mut(), queue_id, entry_id, &viewer.email)
            .await
            .map_err(|err| match err {
                ohq_storage::StorageError::NotFound => ApiError::NotFound(
                    "entry already removed by another staff member".to_string(),
                ),
                other => other.into(),
            })?;

        let events = vec![
            (
                admin_topic(queue_id),
                Envelope::new(EventKind::EntryRemove, &entry),
            ),
            (
                nonpriv_topic(queue_id),
                Envelope::new(EventKind::EntryRemove, entry.anonymized()),
            ),
        ];
        self.commit_and_publish(tx, events).await?;

        tracing::info!(queue = %queue_id, entry = %entry_id, removed_by = %viewer.email, "entry removed");
        Ok(())
    }

    /// Promote an archived entry back onto the queue.
    pub async fn pin_entry(
        &self,
        queue_id: Tid,
        entry_id: Tid,
        viewer: &SessionIdentity,
    ) -> Result<QueueEntry, ApiError> {
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;

        let existing = self.entries.get(tx.as_mut(), queue_id, entry_id).await?;
        if !existing.is_active()
            && self
                .entries
                .active_entry_for(tx.as_mut(), queue_id, &existing.email)
                .await?
                .is_some()
        {
            return Err(ApiError::Conflict(
                "student already has an active entry".to_string(),
            ));
        }

        let entry = self
            .entries
            .pin(tx.as_mut(), queue_id, entry_id)
            .await
            .map_err(|err| match err {
                // A concurrent signup can still beat the check above.
                ohq_storage::StorageError::Conflict => ApiError::Conflict(
                    "student already has an active entry".to_string(),
                ),
                other => other.into(),
            })?;

        let events = vec![
            (
                admin_topic(queue_id),
                Envelope::new(EventKind::StackRemove, json!({ "id": entry.id })),
            ),
            (
                admin_topic(queue_id),
                Envelope::new(EventKind::EntryCreate, &entry),
            ),
            (
                nonpriv_topic(queue_id),
                Envelope::new(EventKind::EntryCreate, entry.anonymized()),
            ),
            (
                email_topic(queue_id, &entry.email),
                Envelope::new(EventKind::EntryUpdate, &entry),
            ),
            (
                email_topic(queue_id, &entry.email),
                Envelope::new(EventKind::EntryPinned, json!({ "id": entry.id })),
            ),
        ];
        self.commit_and_publish(tx, events).await?;
        Ok(entry)
    }

    /// Flag or unflag an entry as currently being helped by the caller.
    pub async fn set_helping(
        &self,
        queue_id: Tid,
        entry_id: Tid,
        viewer: &SessionIdentity,
        helping: bool,
    ) -> Result<QueueEntry, ApiError> {
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;

        let marker = if helping {
            format!(" {}", viewer.first_name)
        } else {
            String::new()
        };
        let entry = self
            .entries
            .set_helping(tx.as_mut(), queue_id, entry_id, &marker)
            .await?;

        let anonymized = entry.anonymized();
        let events = vec![
            (
                admin_topic(queue_id),
                Envelope::new(EventKind::EntryUpdate, &entry),
            ),
            (
                nonpriv_topic(queue_id),
                Envelope::new(EventKind::EntryUpdate, anonymized),
            ),
            (
                email_topic(queue_id, &entry.email),
                Envelope::new(EventKind::EntryUpdate, &entry),
            ),
            (
                email_topic(queue_id, &entry.email),
                Envelope::new(EventKind::EntryHelping, helping),
            ),
        ];
        self.commit_and_publish(tx, events).await?;
        Ok(entry)
    }

    /// Mark an archived entry as not actually helped, undoing its effect on
    /// cooldown and the daily boost.
    pub async fn set_not_helped(
        &self,
        queue_id: Tid,
        entry_id: Tid,
        viewer: &SessionIdentity,
    ) -> Result<(), ApiError> {
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;

        let entry = self
            .entries
            .set_helped(tx.as_mut(), queue_id, entry_id, false)
            .await?;

        let events = vec![
            (
                admin_topic(queue_id),
                Envelope::new(EventKind::EntryUpdate, &entry),
            ),
            (
                email_topic(queue_id, &entry.email),
                Envelope::new(EventKind::NotHelped, json!({ "id": entry.id })),
            ),
        ];
        self.commit_and_publish(tx, events).await?;
        Ok(())
    }

    /// Shuffle every active entry's priority.
    pub async fn randomize(&self, queue_id: Tid, viewer: &SessionIdentity) -> Result<(), ApiError> {
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;

        let entries = self.entries.randomize(tx.as_mut(), queue_id).await?;

        let mut events: PendingEvents = vec![(
            generic_topic(queue_id),
            Envelope::signal(EventKind::QueueRandomize),
        )];
        for entry in &entries {
            events.push((
                admin_topic(queue_id),
                Envelope::new(EventKind::EntryUpdate, entry),
            ));
            events.push((
                nonpriv_topic(queue_id),
                Envelope::new(EventKind::EntryUpdate, entry.anonymized()),
            ));
        }
        self.commit_and_publish(tx, events).await?;
        Ok(())
    }

    /// Archive every active entry at once.
    pub async fn clear_queue(
        &self,
        queue_id: Tid,
        viewer: &SessionIdentity,
    ) -> Result<(), ApiError> {
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;

        let cleared = self
            .entries
            .clear(tx.as_mut(), queue_id, &viewer.email)
            .await?;

        let events = vec![
            (
                admin_topic(queue_id),
                Envelope::new(EventKind::QueueClear, json!({ "remover": viewer.email })),
            ),
            (
                nonpriv_topic(queue_id),
                Envelope::signal(EventKind::QueueClear),
            ),
        ];
        self.commit_and_publish(tx, events).await?;

        tracing::info!(queue = %queue_id, cleared = cleared.len(), by = %viewer.email, "queue cleared");
        Ok(())
    }

    /// Flip the manual-open switch.
    pub async fn set_open(
        &self,
        queue_id: Tid,
        viewer: &SessionIdentity,
        open: bool,
    ) -> Result<(), ApiError> {
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;

        self.queues.set_manual_open(tx.as_mut(), queue_id, open).await?;

        let events = vec![(
            generic_topic(queue_id),
            Envelope::new(EventKind::QueueOpen, open),
        )];
        self.commit_and_publish(tx, events).await
    }

    pub async fn add_announcement(
        &self,
        queue_id: Tid,
        viewer: &SessionIdentity,
        req: AnnouncementRequest,
    ) -> Result<Announcement, ApiError> {
        if req.content.trim().is_empty() {
            return Err(ApiError::Validation(
                "announcement must not be empty".to_string(),
            ));
        }
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;

        let announcement = self
            .queues
            .add_announcement(tx.as_mut(), queue_id, &req.content)
            .await?;

        let events = vec![(
            generic_topic(queue_id),
            Envelope::new(EventKind::AnnouncementCreate, &announcement),
        )];
        self.commit_and_publish(tx, events).await?;
        Ok(announcement)
    }

    pub async fn remove_announcement(
        &self,
        queue_id: Tid,
        announcement_id: Tid,
        viewer: &SessionIdentity,
    ) -> Result<(), ApiError> {
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;

        self.queues
            .remove_announcement(tx.as_mut(), queue_id, announcement_id)
            .await?;

        let events = vec![(
            generic_topic(queue_id),
            Envelope::new(EventKind::AnnouncementDelete, json!({ "id": announcement_id })),
        )];
        self.commit_and_publish(tx, events).await
    }

    /// Replace the queue configuration. Clients reload rather than patching.
    pub async fn update_configuration(
        &self,
        queue_id: Tid,
        viewer: &SessionIdentity,
        req: ConfigurationUpdateRequest,
    ) -> Result<QueueConfiguration, ApiError> {
        policy::validate_prompts(&req.prompts).map_err(ApiError::Validation)?;
        if req.cooldown_seconds < 0 {
            return Err(ApiError::Validation(
                "cooldown must not be negative".to_string(),
            ));
        }

        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;

        let config = QueueConfiguration {
            id: queue_id,
            is_virtual: req.is_virtual,
            enable_location_field: req.enable_location_field,
            prevent_unregistered: req.prevent_unregistered,
            prevent_groups: req.prevent_groups,
            prevent_groups_boost: req.prevent_groups_boost,
            prioritize_new: req.prioritize_new,
            scheduled: req.scheduled,
            manual_open: false, // preserved by the store, not part of the update
            cooldown_seconds: req.cooldown_seconds,
            prompts: req.prompts,
        };
        let updated = self
            .queues
            .update_configuration(tx.as_mut(), queue_id, &config)
            .await?;

        let events = vec![(generic_topic(queue_id), Envelope::signal(EventKind::Refresh))];
        self.commit_and_publish(tx, events).await?;
        Ok(updated)
    }

    pub async fn update_schedule(
        &self,
        queue_id: Tid,
        viewer: &SessionIdentity,
        days: Vec<String>,
    ) -> Result<(), ApiError> {
        policy::validate_week_schedule(&days).map_err(ApiError::Validation)?;

        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;

        self.queues.update_schedule(tx.as_mut(), queue_id, &days).await?;

        let events = vec![(generic_topic(queue_id), Envelope::signal(EventKind::Refresh))];
        self.commit_and_publish(tx, events).await
    }

    /// Fan an ephemeral staff message out to one student or the whole queue.
    /// Nothing is persisted and the sender is redacted.
    pub async fn send_message(
        &self,
        queue_id: Tid,
        viewer: &SessionIdentity,
        req: MessageRequest,
    ) -> Result<(), ApiError> {
        if req.content.trim().is_empty() {
            return Err(ApiError::Validation("message must not be empty".to_string()));
        }
        if req.receiver.is_empty() {
            return Err(ApiError::Validation("receiver is required".to_string()));
        }

        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;
        drop(tx);

        let message = Message {
            id: Tid::new(),
            queue: queue_id,
            sender: String::new(),
            receiver: req.receiver.clone(),
            content: req.content,
        };
        let event = Envelope::new(EventKind::MessageCreate, &message);
        if req.receiver == BROADCAST_RECEIVER {
            self.bus.publish(&generic_topic(queue_id), &event);
        } else {
            self.bus.publish(&email_topic(queue_id, &req.receiver), &event);
        }
        Ok(())
    }

    // Queue lifecycle.

    pub async fn create_queue(
        &self,
        course_id: Tid,
        viewer: &SessionIdentity,
        req: CreateQueueRequest,
    ) -> Result<Queue, ApiError> {
        if req.name.trim().is_empty() {
            return Err(ApiError::Validation("queue name is required".to_string()));
        }
        let mut tx = self.begin().await?;
        let course = self.courses.get(tx.as_mut(), course_id).await?;
        if !self.is_course_admin(tx.as_mut(), course.id, viewer).await? {
            return Err(ApiError::Forbidden("course admin required".to_string()));
        }
        let queue = self
            .queues
            .create_queue(tx.as_mut(), course.id, QueueType::Ordered, &req.name, &req.location)
            .await?;
        self.commit_and_publish(tx, Vec::new()).await?;
        Ok(queue)
    }

    pub async fn update_queue(
        &self,
        queue_id: Tid,
        viewer: &SessionIdentity,
        req: QueueUpdateRequest,
    ) -> Result<Queue, ApiError> {
        if req.name.trim().is_empty() {
            return Err(ApiError::Validation("queue name is required".to_string()));
        }
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;
        let updated = self
            .queues
            .update_queue(tx.as_mut(), queue_id, &req.name, &req.location)
            .await?;
        self.commit_and_publish(tx, Vec::new()).await?;
        Ok(updated)
    }

    pub async fn delete_queue(
        &self,
        queue_id: Tid,
        viewer: &SessionIdentity,
    ) -> Result<(), ApiError> {
        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;
        self.queues.delete_queue(tx.as_mut(), queue_id).await?;
        self.commit_and_publish(tx, Vec::new()).await
    }

    // Roster and groups.

    pub async fn set_groups(
        &self,
        queue_id: Tid,
        viewer: &SessionIdentity,
        groups: Vec<Vec<String>>,
    ) -> Result<(), ApiError> {
        let mut seen = std::collections::HashSet::new();
        for email in groups.iter().flatten() {
            if email.trim().is_empty() {
                return Err(ApiError::Validation("group emails must not be blank".to_string()));
            }
            if !seen.insert(email.as_str()) {
                return Err(ApiError::Validation(format!(
                    "email {email} appears in more than one group"
                )));
            }
        }

        let mut tx = self.begin().await?;
        let queue = self.queues.get_queue(tx.as_mut(), queue_id).await?;
        self.require_course_admin(tx.as_mut(), &queue, viewer).await?;
        self.roster.set_groups(tx.as_mut(), queue_id, &groups).await?;
        self.commit_and_publish(tx, Vec::new()).await
    }
}
