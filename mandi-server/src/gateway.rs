//! Session Gateway: orchestrazione di join/leave/send per connessione.
//!
//! Il send è una pipeline in tre passi con politica di fallimento esplicita:
//! 1. `MessageStore::append`: un errore qui fallisce il send, niente viene scritto né trasmesso;
//! 2. `GroupDirectory::record_activity`: un errore viene loggato, il send prosegue;
//! 3. `BroadcastHub::publish`: non fallisce, le sessioni morte vengono saltate.
//!
//! I tre passi girano sotto un lock per gruppo, così l'ordine di publish coincide con
//! l'ordine nello store; gruppi diversi non si bloccano a vicenda.

use dashmap::DashMap;
use mandi_core::{Message, SendMessageRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;

use crate::directory::GroupDirectory;
use crate::error::{ChatError, ChatResult};
use crate::hub::BroadcastHub;
use crate::membership::{RoomMembership, SessionId};
use crate::store::{MessageStore, NewMessage};

pub struct Gateway {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn GroupDirectory>,
    membership: Arc<RoomMembership>,
    hub: Arc<BroadcastHub>,
    group_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn GroupDirectory>,
        membership: Arc<RoomMembership>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Gateway { store, directory, membership, hub, group_locks: DashMap::new() }
    }

    pub fn membership(&self) -> &Arc<RoomMembership> {
        &self.membership
    }

    /// Apre una nuova sessione: la registra nel membership manager e le assegna una coda nel hub.
    pub fn connect(self: &Arc<Self>) -> (Session, Inbox) {
        let id = SessionId::new();
        self.membership.connect(id);
        let outlet = self.hub.attach(id);
        tracing::debug!(session = %id, "session connected");
        let session = Session {
            id,
            gateway: Arc::clone(self),
            closed: AtomicBool::new(false),
        };
        let inbox = Inbox { session: id, membership: self.membership.clone(), outlet };
        (session, inbox)
    }

    /// Valida, persiste, aggiorna la directory e trasmette. Il risultato non dipende dal fan-out.
    pub async fn send(&self, req: SendMessageRequest) -> ChatResult<Message> {
        let msg = NewMessage {
            group_id: req.group_id,
            sender_id: req.sender_id,
            sender_name: req.sender_name,
            text: req.text,
            kind: req.kind.unwrap_or_default(),
        };
        msg.validate()?;

        let group_id = msg.group_id.clone();
        let lock = self
            .group_locks
            .entry(group_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.send_locked(msg).await
        };

        drop(lock);
        // libera il lock del gruppo se nessun altro lo sta usando (evita di accumulare id inesistenti)
        self.group_locks.remove_if(&group_id, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn send_locked(&self, msg: NewMessage) -> ChatResult<Message> {
        let message = self.store.append(msg).await?;

        if let Err(e) = self
            .directory
            .record_activity(&message.group_id, &message.text, &message.created_at)
            .await
        {
            tracing::warn!(
                group_id = %message.group_id,
                message_id = %message.id,
                "last-message projection not updated: {}",
                e
            );
        }

        self.hub.publish(message.clone());
        Ok(message)
    }

    fn close_session(&self, id: SessionId) {
        let left = self.membership.drop_session(id);
        self.hub.detach(id);
        tracing::debug!(session = %id, groups = left.len(), "session disconnected");
    }
}

/// Handle di una connessione. `Connected` finché non viene chiamato `disconnect` (o il drop).
pub struct Session {
    id: SessionId,
    gateway: Arc<Gateway>,
    closed: AtomicBool,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> ChatResult<()> {
        if self.is_closed() {
            Err(ChatError::SessionClosed)
        } else {
            Ok(())
        }
    }

    pub fn join(&self, group_id: &str) -> ChatResult<()> {
        self.ensure_open()?;
        if group_id.trim().is_empty() {
            return Err(ChatError::validation("missing required fields: groupId"));
        }
        if self.gateway.membership.join(self.id, group_id)? {
            tracing::debug!(session = %self.id, group_id = %group_id, "joined group");
        }
        Ok(())
    }

    pub fn leave(&self, group_id: &str) -> ChatResult<()> {
        self.ensure_open()?;
        if self.gateway.membership.leave(self.id, group_id) {
            tracing::debug!(session = %self.id, group_id = %group_id, "left group");
        }
        Ok(())
    }

    /// Come `Gateway::send`. Se la sessione si chiude mentre il send è in volo il messaggio resta
    /// persistito e trasmesso, ma al chiamante arriva `SessionClosed`.
    pub async fn send(&self, req: SendMessageRequest) -> ChatResult<Message> {
        self.ensure_open()?;
        let message = self.gateway.send(req).await?;
        self.ensure_open()?;
        Ok(message)
    }

    /// Stato terminale. Idempotente: la pulizia della membership avviene una sola volta.
    pub fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.gateway.close_session(self.id);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Lato ricezione della sessione: i messaggi trasmessi dal hub, nell'ordine di publish.
pub struct Inbox {
    session: SessionId,
    membership: Arc<RoomMembership>,
    outlet: UnboundedReceiver<Arc<Message>>,
}

impl Inbox {
    /// Prossimo messaggio per un gruppo di cui la sessione è ancora membro.
    /// `None` dopo la disconnessione.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        while let Some(message) = self.outlet.recv().await {
            // accodato prima di un leave: non va consegnato dopo
            if self.membership.is_member(self.session, &message.group_id) {
                return Some(message);
            }
        }
        None
    }

    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        while let Ok(message) = self.outlet.try_recv() {
            if self.membership.is_member(self.session, &message.group_id) {
                return Some(message);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{NewGroup, SqliteGroupDirectory};
    use crate::store::SqliteMessageStore;
    use crate::test_support::memory_pool;
    use async_trait::async_trait;
    use mandi_core::{Group, GroupFilter, MessageType};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Fixture {
        gateway: Arc<Gateway>,
        directory: Arc<SqliteGroupDirectory>,
        store: Arc<SqliteMessageStore>,
    }

    async fn fixture() -> Fixture {
        let pool = memory_pool().await;
        let store = Arc::new(SqliteMessageStore::new(pool.clone(), TIMEOUT));
        let directory = Arc::new(SqliteGroupDirectory::new(pool, TIMEOUT));
        let membership = Arc::new(RoomMembership::new());
        let hub = Arc::new(BroadcastHub::new(membership.clone()));
        let gateway = Arc::new(Gateway::new(store.clone(), directory.clone(), membership, hub));
        Fixture { gateway, directory, store }
    }

    async fn seeded_group(f: &Fixture) -> Group {
        f.directory.list(&GroupFilter::default()).await.unwrap().remove(0)
    }

    fn req(group_id: &str, text: &str) -> SendMessageRequest {
        SendMessageRequest {
            group_id: group_id.to_string(),
            text: text.to_string(),
            sender_id: "u1".to_string(),
            sender_name: "Farmer1".to_string(),
            kind: None,
        }
    }

    /// Store che conta le chiamate e delega a un altro store.
    struct CountingStore {
        inner: Arc<dyn MessageStore>,
        appends: AtomicUsize,
    }

    #[async_trait]
    impl MessageStore for CountingStore {
        async fn append(&self, msg: NewMessage) -> ChatResult<Message> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            self.inner.append(msg).await
        }

        async fn list_by_group(&self, group_id: &str) -> ChatResult<Vec<Message>> {
            self.inner.list_by_group(group_id).await
        }
    }

    /// Directory il cui aggiornamento della proiezione fallisce sempre.
    struct BrokenDirectory(Arc<SqliteGroupDirectory>);

    #[async_trait]
    impl GroupDirectory for BrokenDirectory {
        async fn list(&self, filter: &GroupFilter) -> ChatResult<Vec<Group>> {
            self.0.list(filter).await
        }

        async fn create(&self, group: NewGroup) -> ChatResult<Group> {
            self.0.create(group).await
        }

        async fn get(&self, group_id: &str) -> ChatResult<Option<Group>> {
            self.0.get(group_id).await
        }

        async fn record_activity(&self, _: &str, _: &str, _: &str) -> ChatResult<()> {
            Err(ChatError::Persistence("directory unavailable".into()))
        }
    }

    /// Store che non riesce mai a persistere: errore immediato o chiamata oltre il limite.
    struct FailingStore {
        stall: bool,
    }

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn append(&self, _: NewMessage) -> ChatResult<Message> {
            if self.stall {
                crate::error::bounded(Duration::from_millis(20), std::future::pending()).await
            } else {
                Err(ChatError::Persistence("disk full".into()))
            }
        }

        async fn list_by_group(&self, _: &str) -> ChatResult<Vec<Message>> {
            Ok(Vec::new())
        }
    }

    /// Directory che conta gli aggiornamenti della proiezione.
    struct CountingDirectory {
        inner: Arc<SqliteGroupDirectory>,
        activity: AtomicUsize,
    }

    #[async_trait]
    impl GroupDirectory for CountingDirectory {
        async fn list(&self, filter: &GroupFilter) -> ChatResult<Vec<Group>> {
            self.inner.list(filter).await
        }

        async fn create(&self, group: NewGroup) -> ChatResult<Group> {
            self.inner.create(group).await
        }

        async fn get(&self, group_id: &str) -> ChatResult<Option<Group>> {
            self.inner.get(group_id).await
        }

        async fn record_activity(&self, group_id: &str, text: &str, at: &str) -> ChatResult<()> {
            self.activity.fetch_add(1, Ordering::SeqCst);
            self.inner.record_activity(group_id, text, at).await
        }
    }

    #[tokio::test]
    async fn persistence_failure_fails_send_without_side_effects() {
        let f = fixture().await;
        let g = seeded_group(&f).await;

        for stall in [false, true] {
            let directory = Arc::new(CountingDirectory { inner: f.directory.clone(), activity: AtomicUsize::new(0) });
            let membership = Arc::new(RoomMembership::new());
            let hub = Arc::new(BroadcastHub::new(membership.clone()));
            let gateway = Arc::new(Gateway::new(
                Arc::new(FailingStore { stall }),
                directory.clone(),
                membership,
                hub,
            ));
            let (s, mut inbox) = gateway.connect();
            s.join(&g.id).unwrap();

            let err = s.send(req(&g.id, "lost")).await.unwrap_err();
            assert!(matches!(err, ChatError::Persistence(_)), "stall={}: {:?}", stall, err);
            assert_eq!(err.code(), "persistence_failure");
            assert!(inbox.try_recv().is_none());
            assert_eq!(directory.activity.load(Ordering::SeqCst), 0);
            assert!(gateway.group_locks.is_empty());
        }

        let listed = f.directory.list(&GroupFilter::default()).await.unwrap();
        assert!(listed.iter().all(|x| x.last_message.is_none()));
    }

    #[tokio::test]
    async fn send_defaults_type_and_updates_history_and_directory() {
        let f = fixture().await;
        let g = seeded_group(&f).await;

        let sent = f.gateway.send(req(&g.id, "Urea prices up")).await.unwrap();
        assert_eq!(sent.kind, MessageType::Text);
        assert_eq!(sent.sender_name, "Farmer1");

        let history = f.store.list_by_group(&g.id).await.unwrap();
        assert_eq!(history, vec![sent.clone()]);

        let listed = f.directory.list(&GroupFilter::default()).await.unwrap();
        let entry = listed.iter().find(|x| x.id == g.id).unwrap();
        assert_eq!(entry.last_message.as_deref(), Some("Urea prices up"));
        assert_eq!(entry.last_message_time, sent.created_at);
        assert_eq!(listed[0].id, g.id);
    }

    #[tokio::test]
    async fn only_joined_sessions_receive() {
        let f = fixture().await;
        let g = seeded_group(&f).await;
        let (s1, mut in1) = f.gateway.connect();
        let (_s2, mut in2) = f.gateway.connect();
        s1.join(&g.id).unwrap();

        let sent = f.gateway.send(req(&g.id, "hello")).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), in1.recv())
            .await
            .expect("timeout")
            .expect("inbox closed");
        assert_eq!(*got, sent);
        assert!(in2.try_recv().is_none());
    }

    #[tokio::test]
    async fn sender_session_gets_its_own_echo() {
        let f = fixture().await;
        let g = seeded_group(&f).await;
        let (s, mut inbox) = f.gateway.connect();
        s.join(&g.id).unwrap();

        let sent = s.send(req(&g.id, "echo")).await.unwrap();
        assert_eq!(inbox.try_recv().map(|m| m.id.clone()), Some(sent.id));
    }

    #[tokio::test]
    async fn unknown_group_fails_without_append_or_broadcast() {
        let f = fixture().await;
        let g = seeded_group(&f).await;
        let (s, mut inbox) = f.gateway.connect();
        s.join("not-a-real-id").unwrap();
        s.join(&g.id).unwrap();

        let err = f.gateway.send(req("not-a-real-id", "hello")).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        assert!(f.store.list_by_group("not-a-real-id").await.unwrap().is_empty());
        assert!(inbox.try_recv().is_none());
        assert!(f.gateway.group_locks.is_empty());
    }

    #[tokio::test]
    async fn empty_text_fails_before_any_persistence_call() {
        let f = fixture().await;
        let g = seeded_group(&f).await;
        let counting = Arc::new(CountingStore { inner: f.store.clone(), appends: AtomicUsize::new(0) });
        let membership = Arc::new(RoomMembership::new());
        let hub = Arc::new(BroadcastHub::new(membership.clone()));
        let gateway = Gateway::new(counting.clone(), f.directory.clone(), membership, hub);

        let err = gateway.send(req(&g.id, "")).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert_eq!(counting.appends.load(Ordering::SeqCst), 0);

        let mut anonymous = req(&g.id, "hi");
        anonymous.sender_id = String::new();
        assert!(matches!(gateway.send(anonymous).await, Err(ChatError::Validation(_))));
        assert_eq!(counting.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn directory_failure_does_not_fail_send_or_broadcast() {
        let f = fixture().await;
        let g = seeded_group(&f).await;
        let membership = Arc::new(RoomMembership::new());
        let hub = Arc::new(BroadcastHub::new(membership.clone()));
        let gateway = Arc::new(Gateway::new(
            f.store.clone(),
            Arc::new(BrokenDirectory(f.directory.clone())),
            membership,
            hub,
        ));
        let (s, mut inbox) = gateway.connect();
        s.join(&g.id).unwrap();

        let sent = gateway.send(req(&g.id, "stored anyway")).await.unwrap();
        assert_eq!(inbox.try_recv().map(|m| m.id.clone()), Some(sent.id));
        assert_eq!(f.store.list_by_group(&g.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_sends_arrive_in_store_order() {
        let f = fixture().await;
        let g = seeded_group(&f).await;
        let (s, mut inbox) = f.gateway.connect();
        s.join(&g.id).unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let gateway = f.gateway.clone();
            let group_id = g.id.clone();
            handles.push(tokio::spawn(async move {
                gateway.send(req(&group_id, &format!("m{}", i))).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stored: Vec<_> = f.store.list_by_group(&g.id).await.unwrap().into_iter().map(|m| m.id).collect();
        let mut received = Vec::new();
        while let Some(m) = inbox.try_recv() {
            received.push(m.id.clone());
        }
        assert_eq!(stored.len(), 20);
        assert_eq!(received, stored);
    }

    #[tokio::test]
    async fn left_group_is_not_delivered_even_if_already_queued() {
        let f = fixture().await;
        let g = seeded_group(&f).await;
        let (s, mut inbox) = f.gateway.connect();
        s.join(&g.id).unwrap();

        f.gateway.send(req(&g.id, "queued")).await.unwrap();
        s.leave(&g.id).unwrap();

        assert!(inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn disconnected_session_rejects_operations_and_releases_membership() {
        let f = fixture().await;
        let g = seeded_group(&f).await;
        let (s, mut inbox) = f.gateway.connect();
        let id = s.id();
        s.join(&g.id).unwrap();

        s.disconnect();
        s.disconnect();

        assert!(f.gateway.membership().members_of(&g.id).is_empty());
        assert!(matches!(s.join(&g.id), Err(ChatError::SessionClosed)));
        assert!(matches!(s.leave(&g.id), Err(ChatError::SessionClosed)));
        assert!(matches!(s.send(req(&g.id, "late")).await, Err(ChatError::SessionClosed)));
        assert!(!f.gateway.membership().is_connected(id));
        assert!(inbox.recv().await.is_none());
        // nessun append per il send rifiutato
        assert!(f.store.list_by_group(&g.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropping_session_cleans_up() {
        let f = fixture().await;
        let g = seeded_group(&f).await;
        {
            let (s, _inbox) = f.gateway.connect();
            s.join(&g.id).unwrap();
            assert_eq!(f.gateway.membership().members_of(&g.id).len(), 1);
        }
        assert!(f.gateway.membership().members_of(&g.id).is_empty());
        assert_eq!(f.gateway.membership().session_count(), 0);
    }
}
