//! Interactive river growth viewer built with eframe/egui.
//!
//! This module defines [`Viewer`], which owns a [`GrowthModel`] driven by
//! the identity mesher and the closed-form sink solver, and implements
//! [`eframe::App`] to render and control it through an egui UI.

use std::ops::RangeInclusive;

use eframe::App;
use rand::{Rng, rngs::ThreadRng};
use river_core::{
    analytic::SinkSolver,
    boundary::{Boundary, Marker},
    config::{BifurcationCriterion, GrowthConfig, GrowthLaw},
    error::GrowthResult,
    field::BoundaryProblem,
    geometry::Geometry,
    mesh::PslgMesher,
    model::{BackwardReport, GrowthModel, IterationReport, TipState},
    point::segment_parameter,
    types::Point,
};
use tracing::{error, info};

/// Side of the square domain.
const DOMAIN_SIZE: f64 = 10.0;

/// Markers of the square, `[bottom, right, top, left]`.
const FRAME: [Marker; 4] = [Marker::Bottom, Marker::Right, Marker::Top, Marker::Left];

/// Clicks farther than this from the boundary (in pixels) seed nothing.
const SNAP_PIXELS: f32 = 12.0;

type Model = GrowthModel<PslgMesher, SinkSolver>;

/// Parameters the viewer starts with, scaled to the 10×10 domain.
fn default_config() -> GrowthConfig {
    let mut cfg = GrowthConfig {
        eps: 1e-3,
        max_iterations: 200,
        law: GrowthLaw::Integral { ds: 0.1, eta: 1.0 },
        growth_min_distance: 0.2,
        ..GrowthConfig::default()
    };
    cfg.sampling.radius = 0.3;
    cfg.sampling.weight_radius = 0.1;
    cfg.bifurcation.criterion = BifurcationCriterion::Asymmetry { threshold: 1.5 };
    cfg.bifurcation.min_length = 0.5;
    cfg
}

fn marker_color(marker: Marker) -> egui::Color32 {
    match marker {
        Marker::Bottom => egui::Color32::from_rgb(80, 140, 255),
        Marker::Top => egui::Color32::from_rgb(255, 170, 60),
        Marker::Left | Marker::Right => egui::Color32::GRAY,
        Marker::River => egui::Color32::LIGHT_BLUE,
        Marker::None => egui::Color32::DARK_GRAY,
    }
}

/// Main application state for the interactive viewer.
///
/// The typical per-frame update is:
/// 1. Handle UI interactions / input.
/// 2. If `running` is `true` and enough time has passed, call [`Viewer::step_once`].
/// 3. Render the boundary, the branches and the tips.
///
/// ### Fields
/// - `model` - Growth driver holding the geometry.
/// - `cfg` - Parameters edited in the side panel; applied with [`Viewer::apply_config`].
///
/// - `rng` - Used to draw a fresh seed for the random parts of the model.
///
/// - `running` - Whether the simulation is currently auto-advancing.
/// - `zoom` - Pixels per world unit.
/// - `pan` - Screen-space pan offset in pixels.
///
/// - `last_report` - Report of the last iteration (grown tips are highlighted).
/// - `last_error` - Last error shown in the status bar.
/// - `backward_steps` - Shrink steps of one backward run.
/// - `last_backward` - Report of the last backward run.
///
/// - `step_interval` - Target time step between automatic simulation steps (seconds).
/// - `last_step_time` - Time stamp of the last step (egui time).
/// - `last_step_dt` - Actual time delta between the last two steps (for display only).
pub struct Viewer {
    model: Model,
    cfg: GrowthConfig,

    rng: ThreadRng,

    running: bool,
    zoom: f32,
    pan: egui::Vec2,

    last_report: Option<IterationReport>,
    last_error: Option<String>,
    backward_steps: usize,
    last_backward: Option<BackwardReport>,

    step_interval: f64,
    last_step_time: f64,
    last_step_dt: f64,
}

impl Viewer {
    /// Creates a viewer on the square domain with one source in the middle
    /// of the bottom edge.
    ///
    /// The camera is centred on the domain.
    ///
    /// ### Returns
    /// A fully-initialized [`Viewer`], or the error raised while building
    /// the model.
    pub fn new() -> GrowthResult<Self> {
        let cfg = default_config();
        let geometry = Geometry::new(Boundary::square(DOMAIN_SIZE, FRAME)?, cfg.eps);
        let model = GrowthModel::new(
            geometry,
            cfg.clone(),
            PslgMesher,
            SinkSolver::default(),
            BoundaryProblem::laplace(),
        )?;

        let zoom = 50.0;
        let half = (DOMAIN_SIZE / 2.0) as f32 * zoom;
        let mut viewer = Self {
            model,
            cfg,
            rng: rand::rng(),
            running: false,
            zoom,
            pan: egui::vec2(-half, half),
            last_report: None,
            last_error: None,
            backward_steps: 3,
            last_backward: None,
            step_interval: 0.1,
            last_step_time: 0.0,
            last_step_dt: 0.0,
        };
        viewer.seed_default_source()?;
        Ok(viewer)
    }

    fn seed_default_source(&mut self) -> GrowthResult<()> {
        let origin = Point::new(DOMAIN_SIZE / 2.0, 0.0);
        self.model
            .geometry_mut()
            .initiate_root_branch_inward(origin)?;
        Ok(())
    }

    /// Drops every branch, restarts the model and seeds the default source
    /// again. Configuration and camera stay; auto-running stops.
    fn reset(&mut self) {
        self.model.reset();
        self.last_report = None;
        self.last_error = None;
        self.last_backward = None;
        self.running = false;
        if let Err(err) = self.seed_default_source() {
            self.last_error = Some(err.to_string());
        }
    }

    /// Drops every branch, leaving a blank domain for manual seeding.
    fn clear(&mut self) {
        self.model.reset();
        self.last_report = None;
        self.last_error = None;
        self.last_backward = None;
    }

    /// Runs one iteration of the model.
    ///
    /// Auto-running stops once the model reports a stop condition or fails.
    fn step_once(&mut self) {
        match self.model.step() {
            Ok(report) => {
                if report.stop.is_some() {
                    self.running = false;
                }
                self.last_report = Some(report);
            }
            Err(err) => {
                error!(%err, "iteration failed");
                self.last_error = Some(err.to_string());
                self.running = false;
            }
        }
    }

    /// Shrinks and regrows the current tree without changing it.
    fn backward_once(&mut self) {
        match self.model.run_backward(self.backward_steps) {
            Ok(report) => {
                self.last_error = None;
                self.last_backward = Some(report);
            }
            Err(err) => {
                error!(%err, "backward run failed");
                self.last_error = Some(err.to_string());
            }
        }
    }

    /// Hands the edited parameters to the model. Invalid parameters are
    /// reported and the model keeps its previous ones.
    fn apply_config(&mut self) {
        match self.model.set_config(self.cfg.clone()) {
            Ok(()) => {
                info!(seed = self.cfg.seed, "configuration applied");
                self.last_error = None;
            }
            Err(err) => self.last_error = Some(err.to_string()),
        }
    }

    fn randomize_seed(&mut self) {
        self.cfg.seed = self.rng.random();
        self.apply_config();
    }

    /// Projects `p` onto the nearest boundary edge if it lies within
    /// `max_distance` of it.
    fn snap_to_boundary(&self, p: Point, max_distance: f64) -> Option<Point> {
        let boundary = self.model.geometry().boundary();
        let (edge, distance) = boundary.nearest_edge(p)?;
        if distance > max_distance {
            return None;
        }
        let e = *boundary.edges().get(edge)?;
        Some(e.a.lerp(e.b, segment_parameter(p, e.a, e.b)))
    }

    /// Seeds a source at the boundary point nearest to `p`, heading inward.
    ///
    /// ### Returns
    /// `true` if a source was added.
    fn seed_source_near(&mut self, p: Point) -> bool {
        let max_distance = f64::from(SNAP_PIXELS / self.zoom);
        let Some(origin) = self.snap_to_boundary(p, max_distance) else {
            return false;
        };
        match self
            .model
            .geometry_mut()
            .initiate_root_branch_inward(origin)
        {
            Ok(id) => {
                info!(id, %origin, "source seeded");
                self.last_error = None;
                true
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                false
            }
        }
    }

    /// Converts a world-space position to screen-space.
    ///
    /// World coordinates are scaled by `zoom`, offset by `pan`, and then
    /// centered inside the given `rect`. The y-axis is flipped so that
    /// positive y goes up in world space.
    fn world_to_screen(&self, p: Point, rect: egui::Rect) -> egui::Pos2 {
        let center = rect.center();
        egui::pos2(
            center.x + p.x as f32 * self.zoom + self.pan.x,
            center.y - p.y as f32 * self.zoom + self.pan.y,
        )
    }

    /// Converts a screen-space position back to world-space.
    ///
    /// This is the inverse of [`Viewer::world_to_screen`] (up to floating
    /// point rounding), using the same `zoom`, `pan`, and `rect` center.
    fn screen_to_world(&self, p: egui::Pos2, rect: egui::Rect) -> Point {
        let center = rect.center();
        let x = (p.x - center.x - self.pan.x) / self.zoom;
        let y = (center.y - p.y + self.pan.y) / self.zoom;
        Point::new(f64::from(x), f64::from(y))
    }

    /// Helper to draw a labeled `usize` [`egui::DragValue`].
    fn labeled_drag_usize(
        ui: &mut egui::Ui,
        label: &str,
        value: &mut usize,
        range: RangeInclusive<usize>,
        speed: f64,
    ) {
        ui.horizontal(|ui| {
            ui.label(label);
            ui.add(egui::DragValue::new(value).range(range).speed(speed));
        });
    }

    /// Helper to draw a labeled `f64` [`egui::DragValue`].
    fn labeled_drag_f64(
        ui: &mut egui::Ui,
        label: &str,
        value: &mut f64,
        range: RangeInclusive<f64>,
        speed: f64,
    ) {
        ui.horizontal(|ui| {
            ui.label(label);
            ui.add(egui::DragValue::new(value).range(range).speed(speed));
        });
    }

    /// Builds the top panel UI (run controls, stepping, zoom).
    fn ui_top_panel(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui
                    .button(if self.running { "⏸ Pause" } else { "▶ Run" })
                    .clicked()
                {
                    self.running = !self.running;
                }

                ui.add(
                    egui::DragValue::new(&mut self.step_interval)
                        .prefix("dt target = ")
                        .range(0.01..=1.0)
                        .speed(0.01),
                );

                if ui.button("Step").clicked() {
                    let now = ctx.input(|i| i.time);
                    if self.last_step_time > 0.0 {
                        self.last_step_dt = now - self.last_step_time;
                    }
                    self.step_once();
                    self.last_step_time = now;
                }

                if ui.button("Reset").clicked() {
                    self.reset();
                }

                if ui.button("Clear").clicked() {
                    self.clear();
                }

                ui.separator();
                ui.add(
                    egui::DragValue::new(&mut self.backward_steps)
                        .prefix("backward steps = ")
                        .range(1..=50),
                );
                if ui.button("Backward").clicked() {
                    self.running = false;
                    self.backward_once();
                }

                ui.separator();
                ui.add(egui::Slider::new(&mut self.zoom, 5.0..=500.0).text("Zoom"));
            });
        });
    }

    /// Builds the bottom status bar (iteration, branch and tip counts, errors).
    fn ui_status_bar(&self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(format!("dt target = {:.3} s", self.step_interval));
                ui.label(format!("dt last = {:.3} s", self.last_step_dt));
                ui.separator();
                ui.label(format!("iteration = {}", self.model.iteration()));
                ui.label(format!("branches = {}", self.model.geometry().tree().len()));
                ui.label(format!(
                    "growing tips = {}",
                    self.model
                        .states()
                        .values()
                        .filter(|s| matches!(s, TipState::Growing))
                        .count()
                ));
                if let Some(stop) = self.model.stop_reason() {
                    ui.label(format!("stopped: {stop:?}"));
                }
                if let Some(report) = &self.last_backward
                    && !report.tips.is_empty()
                {
                    let drift = report.tips.values().map(|t| t.drift()).sum::<f64>()
                        / report.tips.len() as f64;
                    ui.separator();
                    ui.label(format!("backward drift = {drift:.4}"));
                }
                if let Some(err) = &self.last_error {
                    ui.separator();
                    ui.colored_label(egui::Color32::LIGHT_RED, err);
                }
            });
        });
    }

    /// Builds the right-hand configuration panel for growth parameters.
    fn ui_config_panel(&mut self, ctx: &egui::Context) {
        egui::SidePanel::right("config_panel")
            .resizable(true)
            .default_width(240.0)
            .show(ctx, |ui| {
                ui.heading("Config");

                ui.separator();
                ui.label("Run");
                Self::labeled_drag_f64(ui, "eps:", &mut self.cfg.eps, 1e-9..=0.1, 1e-4);
                Self::labeled_drag_usize(
                    ui,
                    "max_iterations:",
                    &mut self.cfg.max_iterations,
                    1..=100_000,
                    1.0,
                );

                ui.separator();
                ui.label("Growth law");
                let integral = matches!(self.cfg.law, GrowthLaw::Integral { .. });
                ui.horizontal(|ui| {
                    if ui.selectable_label(integral, "Integral").clicked() && !integral {
                        self.cfg.law = GrowthLaw::Integral { ds: 0.1, eta: 1.0 };
                    }
                    if ui.selectable_label(!integral, "Gain").clicked() && integral {
                        self.cfg.law = GrowthLaw::Gain { gain: 0.1 };
                    }
                });
                match &mut self.cfg.law {
                    GrowthLaw::Integral { ds, eta } => {
                        Self::labeled_drag_f64(ui, "ds:", ds, 0.0..=2.0, 0.005);
                        Self::labeled_drag_f64(ui, "eta:", eta, 0.0..=10.0, 0.05);
                    }
                    GrowthLaw::Gain { gain } => {
                        Self::labeled_drag_f64(ui, "gain:", gain, 0.0..=10.0, 0.01);
                    }
                }
                Self::labeled_drag_f64(
                    ui,
                    "growth_threshold:",
                    &mut self.cfg.growth_threshold,
                    0.0..=100.0,
                    0.01,
                );
                Self::labeled_drag_f64(
                    ui,
                    "growth_min_distance:",
                    &mut self.cfg.growth_min_distance,
                    0.0..=5.0,
                    0.01,
                );

                ui.separator();
                ui.label("Bifurcation");
                let b = &mut self.cfg.bifurcation;
                ui.horizontal(|ui| {
                    let never = matches!(b.criterion, BifurcationCriterion::Never);
                    if ui.selectable_label(never, "Never").clicked() {
                        b.criterion = BifurcationCriterion::Never;
                    }
                    let asym = matches!(b.criterion, BifurcationCriterion::Asymmetry { .. });
                    if ui.selectable_label(asym, "Asymmetry").clicked() && !asym {
                        b.criterion = BifurcationCriterion::Asymmetry { threshold: 1.5 };
                    }
                    let random = matches!(b.criterion, BifurcationCriterion::Random { .. });
                    if ui.selectable_label(random, "Random").clicked() && !random {
                        b.criterion = BifurcationCriterion::Random { threshold: 0.9 };
                    }
                });
                match &mut b.criterion {
                    BifurcationCriterion::Asymmetry { threshold }
                    | BifurcationCriterion::Flux { threshold }
                    | BifurcationCriterion::Random { threshold } => {
                        Self::labeled_drag_f64(ui, "threshold:", threshold, 0.0..=100.0, 0.01);
                    }
                    BifurcationCriterion::Combined { asymmetry, flux } => {
                        Self::labeled_drag_f64(ui, "asymmetry:", asymmetry, 0.0..=100.0, 0.01);
                        Self::labeled_drag_f64(ui, "flux:", flux, 0.0..=1.0, 0.01);
                    }
                    BifurcationCriterion::Never => {}
                }
                Self::labeled_drag_f64(ui, "angle:", &mut b.angle, 0.01..=1.57, 0.01);
                Self::labeled_drag_f64(ui, "min_length:", &mut b.min_length, 0.0..=5.0, 0.01);

                ui.separator();
                ui.label("Sampling");
                let s = &mut self.cfg.sampling;
                Self::labeled_drag_f64(ui, "radius:", &mut s.radius, 0.001..=5.0, 0.01);
                Self::labeled_drag_f64(
                    ui,
                    "weight_radius:",
                    &mut s.weight_radius,
                    0.001..=5.0,
                    0.01,
                );
                Self::labeled_drag_usize(ui, "rings:", &mut s.rings, 1..=64, 1.0);
                Self::labeled_drag_usize(ui, "sectors:", &mut s.sectors, 2..=128, 1.0);

                ui.separator();
                ui.horizontal(|ui| {
                    ui.label(format!("seed: {}", self.cfg.seed));
                    if ui.button("🎲").clicked() {
                        self.randomize_seed();
                    }
                });
                ui.horizontal(|ui| {
                    if ui.button("Apply").clicked() {
                        self.apply_config();
                    }
                    if ui.button("Reset cfg to default").clicked() {
                        self.cfg = default_config();
                        self.apply_config();
                    }
                });
            });
    }

    /// Draws the snapped seeding point under the cursor.
    fn ui_seed_hint(&self, painter: &egui::Painter, rect: egui::Rect, hover_world: Option<Point>) {
        let Some(p) = hover_world else {
            return;
        };
        let max_distance = f64::from(SNAP_PIXELS / self.zoom);
        if let Some(origin) = self.snap_to_boundary(p, max_distance) {
            let s = self.world_to_screen(origin, rect);
            painter.circle_stroke(s, 5.0, egui::Stroke::new(1.5, egui::Color32::YELLOW));
        }
    }

    /// Builds the central panel where the domain and the river network are
    /// drawn and interacted with.
    fn ui_central_panel(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let response = ui.allocate_response(ui.available_size(), egui::Sense::click_and_drag());
            let rect = response.rect;
            let painter = ui.painter_at(rect);

            // Pan with drag.
            if response.dragged() {
                self.pan += response.drag_delta();
            }

            let hover_world = response.hover_pos().map(|p| self.screen_to_world(p, rect));

            // Click next to the boundary seeds a source there.
            if response.clicked()
                && let Some(p) = hover_world
            {
                self.seed_source_near(p);
            }

            // Zoom around the mouse cursor.
            let scroll = ui.ctx().input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                let pointer_screen = response.hover_pos().unwrap_or(rect.center());
                let world_before = self.screen_to_world(pointer_screen, rect);

                let factor = (1.0 + scroll * 0.001).clamp(0.5, 2.0);
                self.zoom = (self.zoom * factor).clamp(5.0, 500.0);

                let screen_after = self.world_to_screen(world_before, rect);
                self.pan += pointer_screen - screen_after;
            }

            let geometry = self.model.geometry();

            // Boundary edges, colored by marker.
            for e in geometry.boundary().edges() {
                let a = self.world_to_screen(e.a, rect);
                let b = self.world_to_screen(e.b, rect);
                painter.line_segment([a, b], egui::Stroke::new(2.0, marker_color(e.marker)));
            }

            // Branches.
            let river = egui::Stroke::new(1.5, marker_color(Marker::River));
            for branch in geometry.tree().branches() {
                let points: Vec<egui::Pos2> = branch
                    .points()
                    .iter()
                    .map(|&p| self.world_to_screen(p, rect))
                    .collect();
                if points.len() > 1 {
                    painter.add(egui::Shape::line(points, river));
                }
            }

            // Tips: red if grown in the last step, grey once terminated.
            let grown = self
                .last_report
                .as_ref()
                .map(|r| r.grown.as_slice())
                .unwrap_or(&[]);
            for (&id, state) in self.model.states() {
                let Some(tip) = geometry.tip(id) else {
                    continue;
                };
                let color = match state {
                    TipState::Terminated(_) => egui::Color32::GRAY,
                    _ if grown.contains(&id) => egui::Color32::RED,
                    _ => egui::Color32::WHITE,
                };
                painter.circle_filled(self.world_to_screen(tip.point, rect), 3.0, color);
            }

            self.ui_seed_hint(&painter, rect, hover_world);

            // Auto-run simulation if requested.
            if self.running {
                let now = ctx.input(|i| i.time);
                let elapsed = now - self.last_step_time;
                if elapsed >= self.step_interval {
                    if self.last_step_time > 0.0 {
                        self.last_step_dt = elapsed;
                    }
                    self.step_once();
                    self.last_step_time = now;
                }

                ctx.request_repaint();
            }
        });
    }
}

impl App for Viewer {
    /// eframe callback that builds all UI panels for each frame.
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.ui_top_panel(ctx);
        self.ui_status_bar(ctx);
        self.ui_config_panel(ctx);
        self.ui_central_panel(ctx);
    }
}
