//! Demo scene: a ground plane, a ring of cubes, one directional light and
//! two orbiting point lights, with a stats overlay.

use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Quat, Vec3, Vec4};
use parking_lot::Mutex;
use winit::event::{Event, WindowEvent};
use winit::event_loop::ControlFlow;

use emberlight::scene::{cube_mesh_data, plane_mesh_data};
use emberlight::{
    create_window, Light, LightItem, Material, Model, RenderItem, Renderer, RendererConfig,
};

fn main() {
    env_logger::init();

    let config = RendererConfig {
        title: "Emberlight Demo".to_string(),
        ..Default::default()
    };

    // Initial asset generation overlaps device/swapchain setup on a single
    // background thread, joined before the first frame.
    let loader = std::thread::spawn(|| {
        let plane = plane_mesh_data(20.0);
        let cube = cube_mesh_data(0.8);
        (plane, cube)
    });

    let (event_loop, window) = create_window(&config).expect("window creation failed");
    let mut renderer = Renderer::new(Arc::clone(&window), config).expect("renderer init failed");

    let ((plane_vertices, plane_indices), (cube_vertices, cube_indices)) =
        loader.join().expect("asset loader thread panicked");

    let base_texture = renderer
        .register_solid_texture([180, 180, 180, 255])
        .expect("texture upload failed");

    let ground = Arc::new(
        Model::with_single_material(
            renderer.context(),
            &plane_vertices,
            &plane_indices,
            Material {
                base_color: Vec4::new(0.9, 0.9, 0.9, 1.0),
                roughness: 0.9,
                albedo_texture: Some(base_texture),
                ..Default::default()
            },
            "ground",
        )
        .expect("ground mesh upload failed"),
    );

    let cube = Arc::new(
        Model::with_single_material(
            renderer.context(),
            &cube_vertices,
            &cube_indices,
            Material {
                base_color: Vec4::new(0.8, 0.3, 0.2, 1.0),
                roughness: 0.4,
                metallic: 0.1,
                ..Default::default()
            },
            "cube",
        )
        .expect("cube mesh upload failed"),
    );

    let sun = Arc::new(Mutex::new(Light::directional(
        Vec3::new(-0.4, -1.0, -0.3),
        Vec3::new(1.0, 0.96, 0.9),
        4.0,
    )));
    let orbit_a = Arc::new(Mutex::new(Light::point(
        Vec3::new(4.0, 2.0, 0.0),
        Vec3::new(0.2, 0.5, 1.0),
        20.0,
        15.0,
    )));
    let orbit_b = Arc::new(Mutex::new(Light::point(
        Vec3::new(-4.0, 2.0, 0.0),
        Vec3::new(1.0, 0.3, 0.2),
        20.0,
        15.0,
    )));

    let stats = renderer.stats();
    renderer.insert_ui(move |ctx| {
        let stats = *stats.lock();
        egui::Window::new("Stats")
            .resizable(false)
            .show(ctx, |ui| {
                ui.label(format!("frame: {}", stats.frame_number));
                ui.label(format!("cpu: {:.2} ms", stats.cpu_frame_ms));
                ui.label(format!("items: {}", stats.render_items));
                ui.label(format!("lights: {}", stats.lights));
            });
    });

    let start = Instant::now();
    let mut resized = false;

    // The only long-lived model owners; every per-frame submission is a
    // clone that the renderer drops on clear_queue.
    let mut models = vec![ground, cube];
    let lights = vec![sun, Arc::clone(&orbit_a), Arc::clone(&orbit_b)];
    let mut renderer = Some(renderer);

    event_loop
        .run(move |event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);
            match event {
                Event::WindowEvent { event, .. } => {
                    if let Some(r) = renderer.as_mut() {
                        if r.on_window_event(&event) {
                            return;
                        }
                    }
                    match event {
                        WindowEvent::CloseRequested => elwt.exit(),
                        WindowEvent::Resized(_) => resized = true,
                        WindowEvent::RedrawRequested => {
                            let Some(r) = renderer.as_mut() else {
                                return;
                            };

                            if resized {
                                resized = false;
                                if let Err(e) = r.recreate_swapchain() {
                                    log::error!("swapchain recreation failed: {}", e);
                                    elwt.exit();
                                    return;
                                }
                            }

                            let t = start.elapsed().as_secs_f32();
                            orbit_a
                                .lock()
                                .set_position(Vec3::new(4.0 * t.cos(), 2.5, 4.0 * t.sin()));
                            orbit_b.lock().set_position(Vec3::new(
                                -4.0 * (t * 0.7).cos(),
                                2.0,
                                -4.0 * (t * 0.7).sin(),
                            ));

                            r.clear_queue();
                            r.submit_render_item(RenderItem {
                                model: Arc::clone(&models[0]),
                                transform: Mat4::IDENTITY,
                            });
                            for i in 0..6 {
                                let angle = t * 0.3 + i as f32 * std::f32::consts::TAU / 6.0;
                                let transform = Mat4::from_rotation_translation(
                                    Quat::from_rotation_y(t + i as f32),
                                    Vec3::new(4.0 * angle.cos(), 1.0, 4.0 * angle.sin()),
                                );
                                r.submit_render_item(RenderItem {
                                    model: Arc::clone(&models[1]),
                                    transform,
                                });
                            }
                            for light in &lights {
                                r.submit_light_item(LightItem::new(Arc::clone(light)));
                            }

                            if let Err(e) = r.render() {
                                log::error!("render failed: {}", e);
                                elwt.exit();
                            }
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => {
                    window.request_redraw();
                }
                Event::LoopExiting => {
                    if let Some(r) = renderer.take() {
                        // Drop the renderer's queued clones so the models
                        // below are uniquely owned again.
                        let mut r = r;
                        r.clear_queue();
                        for light in &lights {
                            light.lock().destroy(r.context());
                        }
                        for model in models.drain(..) {
                            match Arc::try_unwrap(model) {
                                Ok(mut model) => model.destroy(r.context()),
                                Err(_) => log::warn!("model still shared at shutdown"),
                            }
                        }
                        r.destroy();
                    }
                }
                _ => {}
            }
        })
        .expect("event loop error");
}
