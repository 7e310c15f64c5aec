//! Two sessions exchanging events through an in-process room.

use std::cell::RefCell;
use std::time::{Duration, Instant};

use notesync_core::{
    Broadcaster, DocumentId, Element, ElementKind, Scene, SceneOutcome, SceneSurface, SceneSync,
    SessionId, TextOutcome, TextReconciler, WireEvent,
};

/// Captures emitted frames as they would travel over the wire.
#[derive(Default)]
struct Outbox(RefCell<Vec<String>>);

impl Broadcaster for Outbox {
    fn broadcast(&self, event: WireEvent) {
        self.0
            .borrow_mut()
            .push(event.encode().expect("encode"));
    }
}

impl Outbox {
    fn drain(&self) -> Vec<WireEvent> {
        self.0
            .borrow_mut()
            .drain(..)
            .map(|frame| WireEvent::decode(&frame).expect("decode"))
            .collect()
    }
}

#[derive(Default)]
struct Canvas {
    shown: Option<Scene>,
}

impl SceneSurface for Canvas {
    fn load(&mut self, scene: &Scene) {
        self.shown = Some(scene.clone());
    }
}

struct Peer {
    scene: Scene,
    sync: SceneSync,
    canvas: Canvas,
    outbox: Outbox,
}

impl Peer {
    fn new(doc: DocumentId) -> Self {
        Self {
            scene: Scene::new(),
            sync: SceneSync::new(doc, SessionId::new()),
            canvas: Canvas::default(),
            outbox: Outbox::default(),
        }
    }

    fn draw(&mut self, now: Instant) {
        self.scene.add_element(Element::new(ElementKind::Ellipse));
        let snapshot = self.scene.snapshot().expect("snapshot");
        self.sync.on_scene_mutated(snapshot, now);
    }

    fn receive(&mut self, events: &[WireEvent]) -> Vec<SceneOutcome> {
        events
            .iter()
            .filter_map(|event| match event {
                WireEvent::SceneUpdate(update) => {
                    Some(self.sync.on_remote(update, &mut self.scene, &mut self.canvas))
                }
                _ => None,
            })
            .collect()
    }
}

#[test]
fn scene_converges_to_last_writer() {
    let doc = DocumentId::new();
    let t0 = Instant::now();
    let mut a = Peer::new(doc);
    let mut b = Peer::new(doc);

    a.draw(t0);
    a.draw(t0 + Duration::from_millis(20));
    a.sync.poll(t0 + Duration::from_millis(200), &a.outbox);
    let from_a = a.outbox.drain();
    assert_eq!(from_a.len(), 1);

    assert_eq!(b.receive(&from_a), vec![SceneOutcome::Applied]);
    assert_eq!(b.scene, a.scene);
    assert_eq!(b.canvas.shown.as_ref(), Some(&a.scene));

    // B's apply did not produce a broadcast.
    assert!(b.sync.poll(t0 + Duration::from_secs(5), &b.outbox).is_none());
    assert!(b.outbox.drain().is_empty());

    b.draw(t0 + Duration::from_millis(300));
    b.sync.flush(&b.outbox);
    let from_b = b.outbox.drain();
    assert_eq!(a.receive(&from_b), vec![SceneOutcome::Applied]);
    assert_eq!(a.scene.element_count(), 3);
    assert_eq!(a.scene, b.scene);
}

#[test]
fn text_round_trip_between_sessions() {
    let doc = DocumentId::new();
    let t0 = Instant::now();
    let outbox = Outbox::default();
    let mut a = TextReconciler::new(doc, SessionId::new(), "");
    let mut b = TextReconciler::new(doc, SessionId::new(), "");

    a.on_local_change("shared notes", 12, t0);
    let write = a
        .poll(t0 + Duration::from_millis(500), &outbox)
        .expect("due");
    assert_eq!(write.document_id, doc);

    let events = outbox.drain();
    let WireEvent::TextUpdate(update) = &events[0] else {
        panic!("expected text update");
    };
    assert!(matches!(b.on_remote(update), TextOutcome::Replaced { .. }));
    assert_eq!(b.buffer(), "shared notes");

    // The relay may echo the frame back to its sender.
    assert_eq!(a.on_remote(update), TextOutcome::SelfOrigin);
}
