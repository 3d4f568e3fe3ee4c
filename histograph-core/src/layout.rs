//! Force-directed layout fed from graph model snapshots.
//!
//! Every load or expansion rebuilds the simulation from the full snapshot.
//! Nodes that were already on screen start from their last position (pinned
//! nodes stay anchored), so an expansion does not make the graph jump.

use crate::graph::GraphEvent;
use crate::snapshot::Snapshot;
use crate::view::truncate_label;
use force_graph::{DefaultNodeIdx, EdgeData, ForceGraph, NodeData, SimulationParameters};
use histograph_client::{NodeId, NodeType};
use std::collections::HashMap;
use std::f64::consts::PI;
use tracing::debug;

pub const EVENT_RADIUS: f64 = 12.0;
pub const PERSON_RADIUS: f64 = 8.0;
pub const HOVER_GROWTH: f64 = 4.0;
pub const MIN_ZOOM: f64 = 0.5;
pub const MAX_ZOOM: f64 = 3.0;
/// Pointer travel (screen units) below which a press/release is a click.
pub const CLICK_SLOP: f64 = 4.0;

const SEED_RING_RADIUS: f64 = 100.0;
const NEIGHBOUR_OFFSET: f64 = 40.0;
const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

/// Drawn radius. A pure function of type and hover state.
pub fn node_radius(node_type: NodeType, hovered: bool) -> f64 {
    let base = match node_type {
        NodeType::Event => EVENT_RADIUS,
        NodeType::Person => PERSON_RADIUS,
    };
    if hovered { base + HOVER_GROWTH } else { base }
}

#[derive(Clone, Debug)]
pub struct LayoutNode {
    pub id: NodeId,
    pub node_type: NodeType,
    pub label: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub x: f64,
    pub y: f64,
    pub k: f64,
}

#[derive(Clone, Debug, PartialEq)]
enum Gesture {
    Idle,
    /// Started on a node. Never pans.
    NodePress {
        node: NodeId,
        start: (f64, f64),
        moved: bool,
    },
    /// Started on the background. Never expands.
    Pan {
        start: (f64, f64),
        origin: (f64, f64),
    },
}

/// Result of a completed pointer gesture.
#[derive(Clone, Debug, PartialEq)]
pub enum Interaction {
    /// Press and release on the same node without dragging.
    Expand(NodeId),
    /// A node was dragged and is now pinned where it was dropped.
    Pinned(NodeId),
    /// The background was dragged.
    Panned,
}

/// A node ready to draw, in screen coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedNode {
    pub id: NodeId,
    pub node_type: NodeType,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub hovered: bool,
}

pub struct LayoutAdapter {
    graph: ForceGraph<LayoutNode, ()>,
    indices: HashMap<NodeId, DefaultNodeIdx>,
    edges: Vec<(DefaultNodeIdx, DefaultNodeIdx)>,
    pinned: HashMap<NodeId, (f32, f32)>,
    transform: ViewTransform,
    gesture: Gesture,
    hovered: Option<NodeId>,
    width: f64,
    height: f64,
}

fn simulation_parameters() -> SimulationParameters {
    SimulationParameters {
        force_charge: 300.0,
        force_spring: 0.05,
        force_max: 100.0,
        node_speed: 3000.0,
        damping_factor: 0.9,
    }
}

impl LayoutAdapter {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            graph: ForceGraph::new(simulation_parameters()),
            indices: HashMap::new(),
            edges: Vec::new(),
            pinned: HashMap::new(),
            transform: ViewTransform {
                x: width / 2.0,
                y: height / 2.0,
                k: 1.0,
            },
            gesture: Gesture::Idle,
            hovered: None,
            width,
            height,
        }
    }

    /// React to a graph model event. Returns true if the layout was rebuilt.
    pub fn apply(&mut self, event: &GraphEvent) -> bool {
        match event {
            GraphEvent::Loaded { snapshot, .. } => {
                self.reset(snapshot);
                true
            }
            GraphEvent::Expanded { snapshot, .. } => {
                self.rebuild(snapshot);
                true
            }
            GraphEvent::Collapsed { .. } | GraphEvent::Failed { .. } => false,
        }
    }

    /// Start over for a different session: no position carries across.
    pub fn reset(&mut self, snapshot: &Snapshot) {
        self.pinned.clear();
        self.hovered = None;
        self.gesture = Gesture::Idle;
        self.indices.clear();
        self.graph = ForceGraph::new(simulation_parameters());
        self.transform = ViewTransform {
            x: self.width / 2.0,
            y: self.height / 2.0,
            k: 1.0,
        };
        self.rebuild(snapshot);
    }

    /// Rebuild the simulation from the full snapshot, seeding known nodes at
    /// their last position.
    pub fn rebuild(&mut self, snapshot: &Snapshot) {
        let previous = self.positions();
        let adjacency = snapshot.adjacency();
        let mut placed: HashMap<NodeId, (f32, f32)> = HashMap::new();
        let mut graph = ForceGraph::new(simulation_parameters());
        let mut indices = HashMap::new();
        let total = snapshot.node_count().max(1);

        for (i, node) in snapshot.nodes().iter().enumerate() {
            let pinned = self.pinned.get(&node.id).copied();
            let (x, y) = pinned
                .or_else(|| previous.get(&node.id).copied())
                .or_else(|| {
                    // Next to a neighbour that already has a position
                    adjacency.get(&node.id).and_then(|neighbours| {
                        neighbours
                            .iter()
                            .find_map(|n| placed.get(*n).or_else(|| previous.get(*n)))
                            .map(|&(nx, ny)| {
                                let angle = i as f64 * GOLDEN_ANGLE;
                                (
                                    nx + (NEIGHBOUR_OFFSET * angle.cos()) as f32,
                                    ny + (NEIGHBOUR_OFFSET * angle.sin()) as f32,
                                )
                            })
                    })
                })
                .unwrap_or_else(|| {
                    let angle = i as f64 * 2.0 * PI / total as f64;
                    (
                        (SEED_RING_RADIUS * angle.cos()) as f32,
                        (SEED_RING_RADIUS * angle.sin()) as f32,
                    )
                });

            let idx = graph.add_node(NodeData {
                x,
                y,
                mass: 10.0,
                is_anchor: pinned.is_some(),
                user_data: LayoutNode {
                    id: node.id.clone(),
                    node_type: node.node_type,
                    label: truncate_label(&node.title),
                },
            });
            placed.insert(node.id.clone(), (x, y));
            indices.insert(node.id.clone(), idx);
        }

        let mut edges = Vec::with_capacity(snapshot.link_count());
        for link in snapshot.links() {
            if let (Some(&src), Some(&tgt)) = (indices.get(&link.source), indices.get(&link.target)) {
                graph.add_edge(src, tgt, EdgeData::default());
                edges.push((src, tgt));
            }
        }

        debug!(
            "Rebuilt layout: {} nodes ({} carried over), {} edges",
            indices.len(),
            previous.len(),
            edges.len()
        );

        if let Some(ref hovered) = self.hovered
            && !indices.contains_key(hovered)
        {
            self.hovered = None;
        }
        self.graph = graph;
        self.indices = indices;
        self.edges = edges;
    }

    fn positions(&self) -> HashMap<NodeId, (f32, f32)> {
        let mut positions = HashMap::with_capacity(self.indices.len());
        self.graph.visit_nodes(|node| {
            positions.insert(node.data.user_data.id.clone(), (node.x(), node.y()));
        });
        positions
    }

    /// Position in graph space.
    pub fn position_of(&self, id: &NodeId) -> Option<(f64, f64)> {
        let idx = *self.indices.get(id)?;
        let mut found = None;
        self.graph.visit_nodes(|node| {
            if node.index() == idx {
                found = Some((node.x() as f64, node.y() as f64));
            }
        });
        found
    }

    pub fn is_pinned(&self, id: &NodeId) -> bool {
        self.pinned.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.indices.len()
    }

    pub fn tick(&mut self, dt: f32) {
        self.graph.update(dt);
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        // Keep the graph centred on the same point of the viewport
        self.transform.x += (width - self.width) / 2.0;
        self.transform.y += (height - self.height) / 2.0;
        self.width = width;
        self.height = height;
    }

    pub fn transform(&self) -> ViewTransform {
        self.transform
    }

    pub fn screen_to_graph(&self, sx: f64, sy: f64) -> (f64, f64) {
        (
            (sx - self.transform.x) / self.transform.k,
            (sy - self.transform.y) / self.transform.k,
        )
    }

    pub fn graph_to_screen(&self, gx: f64, gy: f64) -> (f64, f64) {
        (
            gx * self.transform.k + self.transform.x,
            gy * self.transform.k + self.transform.y,
        )
    }

    /// Topmost node under a screen position.
    pub fn node_at(&self, sx: f64, sy: f64) -> Option<NodeId> {
        let (gx, gy) = self.screen_to_graph(sx, sy);
        let mut found = None;
        self.graph.visit_nodes(|node| {
            let info = &node.data.user_data;
            let hovered = self.hovered.as_ref() == Some(&info.id);
            let radius = node_radius(info.node_type, hovered);
            let (dx, dy) = (node.x() as f64 - gx, node.y() as f64 - gy);
            if (dx * dx + dy * dy).sqrt() <= radius {
                found = Some(info.id.clone());
            }
        });
        found
    }

    /// Update hover from a pointer position. Ignored while a gesture is active.
    pub fn hover(&mut self, sx: f64, sy: f64) -> Option<&NodeId> {
        if self.gesture == Gesture::Idle {
            self.hovered = self.node_at(sx, sy);
        }
        self.hovered.as_ref()
    }

    pub fn clear_hover(&mut self) {
        self.hovered = None;
    }

    pub fn hovered(&self) -> Option<&NodeId> {
        self.hovered.as_ref()
    }

    pub fn pointer_down(&mut self, sx: f64, sy: f64) {
        self.gesture = match self.node_at(sx, sy) {
            Some(node) => Gesture::NodePress {
                node,
                start: (sx, sy),
                moved: false,
            },
            None => Gesture::Pan {
                start: (sx, sy),
                origin: (self.transform.x, self.transform.y),
            },
        };
    }

    pub fn pointer_move(&mut self, sx: f64, sy: f64) {
        match self.gesture {
            Gesture::NodePress {
                ref node,
                start,
                ref mut moved,
            } => {
                if !*moved && (sx - start.0).hypot(sy - start.1) < CLICK_SLOP {
                    return;
                }
                *moved = true;
                let node = node.clone();
                let (gx, gy) = self.screen_to_graph(sx, sy);
                self.move_node(&node, gx as f32, gy as f32);
            }
            Gesture::Pan { start, origin } => {
                self.transform.x = origin.0 + (sx - start.0);
                self.transform.y = origin.1 + (sy - start.1);
            }
            Gesture::Idle => {
                self.hover(sx, sy);
            }
        }
    }

    pub fn pointer_up(&mut self, sx: f64, sy: f64) -> Option<Interaction> {
        self.pointer_move(sx, sy);
        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::NodePress { node, moved: false, .. } => Some(Interaction::Expand(node)),
            Gesture::NodePress { node, moved: true, .. } => {
                if let Some((x, y)) = self.position_of(&node) {
                    self.pinned.insert(node.clone(), (x as f32, y as f32));
                }
                Some(Interaction::Pinned(node))
            }
            Gesture::Pan { start, .. } if (sx - start.0).hypot(sy - start.1) >= CLICK_SLOP => {
                Some(Interaction::Panned)
            }
            Gesture::Pan { .. } | Gesture::Idle => None,
        }
    }

    fn move_node(&mut self, id: &NodeId, x: f32, y: f32) {
        let Some(&idx) = self.indices.get(id) else {
            return;
        };
        self.graph.visit_nodes_mut(|node| {
            if node.index() == idx {
                node.data.x = x;
                node.data.y = y;
                node.data.is_anchor = true;
            }
        });
    }

    /// Release a pinned node back into the simulation.
    pub fn unpin(&mut self, id: &NodeId) {
        if self.pinned.remove(id).is_none() {
            return;
        }
        if let Some(&idx) = self.indices.get(id) {
            self.graph.visit_nodes_mut(|node| {
                if node.index() == idx {
                    node.data.is_anchor = false;
                }
            });
        }
    }

    /// Zoom by `factor` around a screen point, clamped to [MIN_ZOOM, MAX_ZOOM].
    pub fn zoom(&mut self, factor: f64, sx: f64, sy: f64) {
        let k = (self.transform.k * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        let (gx, gy) = self.screen_to_graph(sx, sy);
        self.transform.k = k;
        self.transform.x = sx - gx * k;
        self.transform.y = sy - gy * k;
    }

    pub fn nodes(&self) -> Vec<PlacedNode> {
        let mut placed = Vec::with_capacity(self.indices.len());
        self.graph.visit_nodes(|node| {
            let info = &node.data.user_data;
            let hovered = self.hovered.as_ref() == Some(&info.id);
            let (x, y) = self.graph_to_screen(node.x() as f64, node.y() as f64);
            placed.push(PlacedNode {
                id: info.id.clone(),
                node_type: info.node_type,
                label: info.label.clone(),
                x,
                y,
                radius: node_radius(info.node_type, hovered) * self.transform.k,
                hovered,
            });
        });
        placed
    }

    /// Edge segments in screen coordinates.
    pub fn edges(&self) -> Vec<((f64, f64), (f64, f64))> {
        let mut segments = Vec::with_capacity(self.edges.len());
        self.graph.visit_edges(|n1, n2, _| {
            segments.push((
                self.graph_to_screen(n1.x() as f64, n1.y() as f64),
                self.graph_to_screen(n2.x() as f64, n2.y() as f64),
            ));
        });
        segments
    }
}
