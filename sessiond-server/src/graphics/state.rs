//! Image and placement store mutated by resolved graphics commands

use std::collections::BTreeMap;

use sessiond_protocol::{GraphicsDelete, GraphicsEvent, GraphicsSnapshot, Image, Placement};

use super::command::{Action, Command, DeleteMode};
use crate::term::Cursor;

const AUTO_PREFIX: &str = "auto:";

/// Cursor advance requested by a placement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorMove {
    pub cols: usize,
    pub rows: usize,
}

/// Images keyed by id and placements keyed by (image id, placement id)
#[derive(Debug, Default)]
pub struct GraphicsState {
    images: BTreeMap<String, Image>,
    placements: BTreeMap<(String, u32), Placement>,
    /// Last auto-assigned image number
    last_image: u32,
    /// Last auto-assigned placement id
    last_placement: u32,
}

impl GraphicsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.placements.is_empty()
    }

    pub fn image(&self, id: &str) -> Option<&Image> {
        self.images.get(id)
    }

    pub fn snapshot(&self) -> GraphicsSnapshot {
        GraphicsSnapshot {
            images: self.images.values().cloned().collect(),
            placements: self.placements.values().cloned().collect(),
        }
    }

    /// Replace all state; auto-id counters resume after the highest id present.
    pub fn restore(&mut self, snapshot: GraphicsSnapshot) {
        self.images.clear();
        self.placements.clear();
        self.last_image = 0;
        self.last_placement = 0;
        for image in snapshot.images {
            if let Some(n) = image
                .id
                .strip_prefix(AUTO_PREFIX)
                .and_then(|n| n.parse::<u32>().ok())
            {
                self.last_image = self.last_image.max(n);
            }
            self.images.insert(image.id.clone(), image);
        }
        for placement in snapshot.placements {
            self.last_placement = self.last_placement.max(placement.id);
            self.placements
                .insert((placement.image_id.clone(), placement.id), placement);
        }
    }

    /// Drop everything; emits a single delete-all event
    pub fn clear_all(&mut self) -> Vec<GraphicsEvent> {
        self.images.clear();
        self.placements.clear();
        self.last_placement = 0;
        vec![GraphicsEvent::delete(GraphicsDelete {
            all: true,
            ..Default::default()
        })]
    }

    pub fn apply(&mut self, command: &Command, cursor: Cursor) -> (Vec<GraphicsEvent>, CursorMove) {
        match command.action {
            Action::Transmit => (self.transmit(command), CursorMove::default()),
            Action::TransmitAndDisplay => {
                let mut events = self.transmit(command);
                if events.is_empty() {
                    return (events, CursorMove::default());
                }
                let image_id = match events.last().and_then(|e| e.image.as_ref()) {
                    Some(image) => image.id.clone(),
                    None => return (events, CursorMove::default()),
                };
                let (placement, movement) = self.place(&image_id, command, cursor);
                events.push(GraphicsEvent::placement(placement));
                (events, movement)
            }
            Action::Place => {
                let image_id = command.resolved_image_id();
                if !self.images.contains_key(&image_id) {
                    return (Vec::new(), CursorMove::default());
                }
                let (placement, movement) = self.place(&image_id, command, cursor);
                (vec![GraphicsEvent::placement(placement)], movement)
            }
            Action::Delete => (self.delete(command, cursor), CursorMove::default()),
        }
    }

    fn transmit(&mut self, command: &Command) -> Vec<GraphicsEvent> {
        if command.payload.is_empty() {
            return Vec::new();
        }
        let mut image_id = command.resolved_image_id();
        if image_id.is_empty() {
            self.last_image = self.last_image.wrapping_add(1);
            image_id = format!("{}{}", AUTO_PREFIX, self.last_image);
        }
        let mut events = self.delete_image(&image_id);
        let image = Image {
            id: image_id.clone(),
            number: command.number,
            format: command.format.clone(),
            width: command.width,
            height: command.height,
            data: command.payload.clone(),
        };
        self.images.insert(image_id, image.clone());
        events.push(GraphicsEvent::image(image));
        events
    }

    fn place(&mut self, image_id: &str, command: &Command, cursor: Cursor) -> (Placement, CursorMove) {
        let id = if command.placement_id != 0 {
            command.placement_id
        } else {
            self.last_placement = self.last_placement.wrapping_add(1);
            self.last_placement
        };
        let placement = Placement {
            id,
            image_id: image_id.to_string(),
            row: cursor.row,
            col: cursor.col,
            rows: command.rows,
            cols: command.cols,
            x: command.x,
            y: command.y,
            z: command.z,
        };
        self.placements
            .insert((image_id.to_string(), id), placement.clone());
        let movement = if command.no_cursor_move {
            CursorMove::default()
        } else {
            CursorMove {
                cols: command.cols,
                rows: command.rows,
            }
        };
        (placement, movement)
    }

    fn delete(&mut self, command: &Command, cursor: Cursor) -> Vec<GraphicsEvent> {
        match command.delete_mode {
            Some(DeleteMode::All) => {
                let placements = std::mem::take(&mut self.placements);
                let images = std::mem::take(&mut self.images);
                self.last_placement = 0;
                placements
                    .into_values()
                    .map(|p| placement_deleted(&p))
                    .chain(images.into_keys().map(image_deleted))
                    .collect()
            }
            Some(DeleteMode::ByImage) => {
                let image_id = command.resolved_image_id();
                if image_id.is_empty() {
                    return Vec::new();
                }
                self.delete_image(&image_id)
            }
            Some(DeleteMode::ByPlacement) => {
                let image_id = command.resolved_image_id();
                if image_id.is_empty() || command.placement_id == 0 {
                    return Vec::new();
                }
                self.placements
                    .remove(&(image_id, command.placement_id))
                    .map(|p| vec![placement_deleted(&p)])
                    .unwrap_or_default()
            }
            Some(DeleteMode::AtCursor) => {
                let hit: Vec<(String, u32)> = self
                    .placements
                    .iter()
                    .filter(|(_, p)| covers(p, cursor))
                    .map(|(key, _)| key.clone())
                    .collect();
                hit.into_iter()
                    .filter_map(|key| self.placements.remove(&key))
                    .map(|p| placement_deleted(&p))
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Remove an image and every placement that references it. Emits the
    /// image delete followed by one event per removed placement; nothing when
    /// the image did not exist.
    fn delete_image(&mut self, image_id: &str) -> Vec<GraphicsEvent> {
        let existed = self.images.remove(image_id).is_some();
        let keys: Vec<(String, u32)> = self
            .placements
            .keys()
            .filter(|(img, _)| img == image_id)
            .cloned()
            .collect();
        if !existed && keys.is_empty() {
            return Vec::new();
        }
        let mut events = vec![image_deleted(image_id.to_string())];
        for key in keys {
            if let Some(p) = self.placements.remove(&key) {
                events.push(placement_deleted(&p));
            }
        }
        events
    }
}

fn covers(placement: &Placement, cursor: Cursor) -> bool {
    let rows = placement.rows.max(1);
    let cols = placement.cols.max(1);
    cursor.row >= placement.row
        && cursor.row < placement.row.saturating_add(rows)
        && cursor.col >= placement.col
        && cursor.col < placement.col.saturating_add(cols)
}

fn image_deleted(image_id: String) -> GraphicsEvent {
    GraphicsEvent::delete(GraphicsDelete {
        image_id,
        ..Default::default()
    })
}

fn placement_deleted(placement: &Placement) -> GraphicsEvent {
    GraphicsEvent::delete(GraphicsDelete {
        all: false,
        image_id: placement.image_id.clone(),
        placement_id: placement.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::command::RawCommand;
    use sessiond_protocol::GraphicsEventKind;

    fn command(apc: &str) -> Command {
        let raw = RawCommand::parse(apc.as_bytes()).unwrap();
        Command::resolve(&raw.params, &raw.payload).unwrap()
    }

    fn at(row: usize, col: usize) -> Cursor {
        Cursor { row, col }
    }

    #[test]
    fn test_transmit_assigns_auto_ids() {
        let mut state = GraphicsState::new();
        let (events, movement) = state.apply(&command("Ga=t;QUJD"), at(0, 0));
        assert_eq!(movement, CursorMove::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].image.as_ref().unwrap().id, "auto:1");

        state.apply(&command("Ga=t;QUJD"), at(0, 0));
        assert!(state.image("auto:2").is_some());
    }

    #[test]
    fn test_transmit_and_display_places_at_cursor() {
        let mut state = GraphicsState::new();
        let (events, movement) =
            state.apply(&command("Ga=T,i=img,c=2,r=3,z=-1;QUJD"), at(4, 5));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, GraphicsEventKind::Image);
        let placement = events[1].placement.as_ref().unwrap();
        assert_eq!((placement.row, placement.col), (4, 5));
        assert_eq!((placement.rows, placement.cols), (3, 2));
        assert_eq!(placement.z, -1);
        assert_eq!(placement.id, 1);
        assert_eq!(movement, CursorMove { cols: 2, rows: 3 });
    }

    #[test]
    fn test_no_cursor_move() {
        let mut state = GraphicsState::new();
        let (_, movement) = state.apply(&command("Ga=T,c=2,r=3,C=1;QUJD"), at(0, 0));
        assert_eq!(movement, CursorMove::default());
    }

    #[test]
    fn test_retransmit_replaces_image_and_placements() {
        let mut state = GraphicsState::new();
        state.apply(&command("Ga=T,i=a,p=7;QUJD"), at(0, 0));
        let (events, _) = state.apply(&command("Ga=t,i=a;REVG"), at(0, 0));
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                GraphicsEventKind::Delete,
                GraphicsEventKind::Delete,
                GraphicsEventKind::Image
            ]
        );
        assert_eq!(state.image("a").unwrap().data, b"DEF");
        assert!(state.snapshot().placements.is_empty());
    }

    #[test]
    fn test_place_requires_existing_image() {
        let mut state = GraphicsState::new();
        let (events, _) = state.apply(&command("Ga=p,i=missing"), at(0, 0));
        assert!(events.is_empty());

        state.apply(&command("Ga=t,i=img;QUJD"), at(0, 0));
        let (events, movement) = state.apply(&command("Ga=p,i=img,p=3,c=1"), at(1, 1));
        assert_eq!(events[0].placement.as_ref().unwrap().id, 3);
        assert_eq!(movement, CursorMove { cols: 1, rows: 0 });
    }

    #[test]
    fn test_delete_all_emits_event_per_entity() {
        let mut state = GraphicsState::new();
        state.apply(&command("Ga=T,i=img;QUJD"), at(0, 0));
        let (events, _) = state.apply(&command("Ga=d,d=a"), at(0, 0));
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == GraphicsEventKind::Delete));
        assert_eq!(events[0].delete.as_ref().unwrap().placement_id, 1);
        assert_eq!(events[1].delete.as_ref().unwrap().image_id, "img");
        assert!(state.snapshot().is_empty());
    }

    #[test]
    fn test_delete_by_image_removes_placements() {
        let mut state = GraphicsState::new();
        state.apply(&command("Ga=T,i=a;QUJD"), at(0, 0));
        state.apply(&command("Ga=p,i=a"), at(2, 0));
        state.apply(&command("Ga=T,i=b;QUJD"), at(5, 0));
        let (events, _) = state.apply(&command("Ga=d,d=i,i=a"), at(0, 0));
        assert_eq!(events.len(), 3);
        let snap = state.snapshot();
        assert_eq!(snap.images.len(), 1);
        assert_eq!(snap.placements.len(), 1);
        assert_eq!(snap.placements[0].image_id, "b");

        let (events, _) = state.apply(&command("Ga=d,d=i,i=a"), at(0, 0));
        assert!(events.is_empty());
    }

    #[test]
    fn test_delete_by_placement() {
        let mut state = GraphicsState::new();
        state.apply(&command("Ga=T,i=a,p=4;QUJD"), at(0, 0));
        let (events, _) = state.apply(&command("Ga=d,d=p,i=a,p=5"), at(0, 0));
        assert!(events.is_empty());
        let (events, _) = state.apply(&command("Ga=d,d=p,i=a,p=4"), at(0, 0));
        let delete = events[0].delete.as_ref().unwrap();
        assert_eq!((delete.image_id.as_str(), delete.placement_id), ("a", 4));
        assert!(state.image("a").is_some());
    }

    #[test]
    fn test_delete_at_cursor_hit_test() {
        let mut state = GraphicsState::new();
        state.apply(&command("Ga=T,i=a,c=3,r=2,C=1;QUJD"), at(1, 1));
        state.apply(&command("Ga=p,i=a,C=1"), at(8, 8));

        let (events, _) = state.apply(&command("Ga=d,d=c"), at(3, 1));
        assert!(events.is_empty(), "row 3 is outside rows 1..3");

        let (events, _) = state.apply(&command("Ga=d,d=c"), at(2, 3));
        assert_eq!(events.len(), 1);

        let (events, _) = state.apply(&command("Ga=d,d=c"), at(8, 8));
        assert_eq!(events.len(), 1, "zero span still covers its anchor cell");
        assert!(state.snapshot().placements.is_empty());
    }

    #[test]
    fn test_clear_all_single_event() {
        let mut state = GraphicsState::new();
        state.apply(&command("Ga=T;QUJD"), at(0, 0));
        let events = state.clear_all();
        assert_eq!(events.len(), 1);
        assert!(events[0].delete.as_ref().unwrap().all);
        assert!(state.is_empty());
    }

    #[test]
    fn test_restore_resumes_counters() {
        let mut state = GraphicsState::new();
        state.apply(&command("Ga=T;QUJD"), at(0, 0));
        state.apply(&command("Ga=T;QUJD"), at(0, 0));
        let snapshot = state.snapshot();

        let mut restored = GraphicsState::new();
        restored.restore(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);

        let (events, _) = restored.apply(&command("Ga=T;QUJD"), at(0, 0));
        assert_eq!(events[0].image.as_ref().unwrap().id, "auto:3");
        assert_eq!(events[1].placement.as_ref().unwrap().id, 3);
    }
}
