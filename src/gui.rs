use crate::{
    particle::ParticleSet,
    render::{Color, PainterSurface, Renderer},
};

/// Rasterises the renderer's painter output into a wgpu render target.
pub struct EguiCanvas {
    ctx: egui::Context,
    screen: egui_wgpu::ScreenDescriptor,

    painter: egui_wgpu::Renderer,
    primitives: Vec<egui::ClippedPrimitive>,
    textures: egui::TexturesDelta,
}

impl EguiCanvas {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat, width: u32, height: u32) -> Self {
        Self {
            ctx: egui::Context::default(),
            screen: egui_wgpu::ScreenDescriptor {
                size_in_pixels: [width, height],
                pixels_per_point: 1.0,
            },

            painter: egui_wgpu::Renderer::new(device, format, None, 1),
            primitives: Vec::new(),
            textures: egui::TexturesDelta::default(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.screen.size_in_pixels = [width, height];
    }

    /// Records one frame of particles as tessellated egui primitives.
    pub fn paint(&mut self, renderer: &Renderer, particles: &ParticleSet, color: Color) {
        let [width, height] = self.screen.size_in_pixels;
        let input = egui::RawInput {
            screen_rect: Some(egui::Rect::from_min_size(
                egui::Pos2::ZERO,
                egui::vec2(width as f32, height as f32),
            )),
            ..Default::default()
        };

        let output = self.ctx.run(input, |ctx| {
            let painter = ctx.layer_painter(egui::LayerId::background());
            renderer.draw_frame(&mut PainterSurface::new(&painter), particles, color);
        });

        self.primitives = self.ctx.tessellate(output.shapes, output.pixels_per_point);
        self.textures.append(output.textures_delta);
    }

    /// Uploads the last painted frame and draws it into `view`, cleared to `background` first.
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        background: Color,
    ) {
        for (id, delta) in &self.textures.set {
            self.painter.update_texture(device, queue, *id, delta);
        }
        // Nothing here registers paint callbacks, so there are no extra command buffers.
        let _ = self
            .painter
            .update_buffers(device, queue, encoder, &self.primitives, &self.screen);

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Canvas Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(background.into()),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            self.painter.render(&mut pass, &self.primitives, &self.screen);
        }

        for id in self.textures.free.drain(..) {
            self.painter.free_texture(&id);
        }
        self.textures.set.clear();
    }
}
