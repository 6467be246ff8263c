//! Styles that repaint the frame: pencil sketch and flat cel shading.
//! Both start from an edge-preserving denoise of the input.

use super::{half_up, linear, Curve, Input, Pass, Resource, SamplerSpec, StyleSpec};
use crate::gpu::PASSTHROUGH_FS;

/// Hue-aware denoise over a golden-angle spiral of up to 81 taps. The tap
/// count grows with intensity.
const DENOISE_FS: &str = "\
precision highp float;
uniform vec2 size;
uniform sampler2D map;
uniform float intensity;
varying vec2 vuv;
const float DIS_BIAS = 0.6;
const float PIXEL_MULTI = 1.5;
const float INV_HUE_TOL = 30.0;
const mat2 GOLDEN = mat2(-0.7306023, 0.6828032, -0.6828032, -0.7306023);
vec3 safeNormalize(vec3 v) {
    return v / max(length(v), 1e-4);
}
void main() {
    float taps = ceil(intensity * 70.0 + 10.0);
    float sampleRadius = 0.5 / taps;
    vec2 texel = 2.0 / size;
    vec3 center = texture2D(map, vuv).rgb;
    vec3 centerNorm = safeNormalize(center);
    float centerSat = length(center);
    vec3 color = vec3(0.0);
    float influenceSum = 0.0;
    vec2 rotated = vec2(0.0, 1.0);
    for (int k = 0; k <= 80; k++) {
        float x = float(k);
        rotated *= GOLDEN;
        vec2 offset = PIXEL_MULTI * rotated * sqrt(x) * 0.5;
        float influence = 1.0 - sampleRadius * pow(max(dot(offset, offset), 0.0), DIS_BIAS);
        vec3 tap = texture2D(map, vuv + offset * texel).rgb;
        influence = influence * influence * influence;
        influence *= pow(max(0.5 + 0.5 * dot(centerNorm, safeNormalize(tap)), 0.0), INV_HUE_TOL);
        influence *= pow(max(1.0 - abs(length(tap) - centerSat), 0.0), 8.0);
        influence *= step(x, taps);
        influenceSum += influence;
        color += tap * influence;
    }
    gl_FragColor = vec4(color / max(influenceSum, 1e-4), 1.0);
}
";

/// Sobel magnitude, contrast-shaped by intensity.
const EDGE_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform vec2 size;
uniform float intensity;
varying vec2 vuv;
float lumi(vec4 c) {
    return 0.299 * c.x + 0.587 * c.y + 0.114 * c.z;
}
void main() {
    vec2 t = vec2(1.0) / size;
    float tleft = lumi(texture2D(map, vuv + vec2(-t.x, t.y)));
    float left = lumi(texture2D(map, vuv + vec2(-t.x, 0.0)));
    float bleft = lumi(texture2D(map, vuv + vec2(-t.x, -t.y)));
    float top = lumi(texture2D(map, vuv + vec2(0.0, t.y)));
    float bottom = lumi(texture2D(map, vuv + vec2(0.0, -t.y)));
    float tright = lumi(texture2D(map, vuv + vec2(t.x, t.y)));
    float right = lumi(texture2D(map, vuv + vec2(t.x, 0.0)));
    float bright = lumi(texture2D(map, vuv + vec2(t.x, -t.y)));
    float gx = tleft + 2.0 * left + bleft - tright - 2.0 * right - bright;
    float gy = -tleft - 2.0 * top - tright + bleft + 2.0 * bottom + bright;
    float g = sqrt(gx * gx + gy * gy);
    float faint = pow(g, intensity * 2.0 + 2.0);
    float strong = g * g * (12.0 + intensity * 12.0);
    float edge = mix(strong, faint, step(g, (2.0 - intensity) * 0.1));
    gl_FragColor = vec4(vec3(edge), 1.0);
}
";

const SKETCH_FS: &str = "\
precision highp float;
uniform sampler2D gridMap;
uniform sampler2D pencilMap;
uniform sampler2D edgeMap;
uniform vec2 size;
varying vec2 vuv;
void main() {
    vec2 gridScale = size / 32.0;
    vec2 pencilScale = size / 256.0;
    vec3 paper = texture2D(gridMap, (vuv - 0.5) * gridScale + 0.5).rgb;
    vec3 pencil = texture2D(pencilMap, (vuv - 0.5) * pencilScale + 0.5).rgb;
    paper = mix(pencil, vec3(1.0), paper.r);
    float edge = texture2D(edgeMap, vuv).r;
    gl_FragColor = vec4(mix(paper, pencil * pencil * pencil, edge), 1.0);
}
";

/// Posterizes luminance into five bands around the frame average, then
/// shades with a wide mip blur.
const FLAT_FS: &str = "\
precision highp float;
uniform sampler2D mipMap;
uniform sampler2D map;
uniform float intensity;
uniform float minSize;
varying vec2 vuv;
vec3 blurred(vec2 uv, float radius, float gamma) {
    vec3 pix = vec3(0.0);
    float norm = 0.0;
    float target = log2(max(radius, 1.0));
    for (int k = 0; k < 20; k++) {
        float lod = float(k) * 0.5;
        float w = exp(-gamma * (target - lod) * (target - lod));
        pix += w * texture2DLodEXT(mipMap, uv, lod).rgb;
        norm += w;
    }
    return pix * pow(max(norm, 1e-4), -0.95);
}
void main() {
    vec3 avgColor = texture2DLodEXT(mipMap, vuv, 10.0).rgb;
    vec3 color = texture2D(map, vuv).rgb;
    color = (color - 0.5) * (1.5 + intensity * intensity * 0.5) + 0.5;
    float avg = avgColor.r * 0.3 + avgColor.g * 0.59 + avgColor.b * 0.11;
    float gray = color.r * 0.3 + color.g * 0.59 + color.b * 0.11;
    float band = min(avg, 1.0 - avg) / 2.0;
    float best = 2.0;
    float shade = 0.7;
    for (int k = 0; k < 5; k++) {
        float level = avg + band * float(k - 2);
        float d = abs(gray - level);
        if (d < best) {
            best = d;
            shade = k == 0 ? 0.0 : (k == 1 ? 0.25 : (k == 2 ? 0.5 : (k == 3 ? 0.6 : 0.7)));
        }
    }
    float radius = minSize * (0.05 + 0.05 * intensity);
    vec3 shaded = vec3(shade) * blurred(vuv, radius, 0.5) * (2.0 - avg);
    gl_FragColor = vec4(shaded, 1.0);
}
";

pub(super) fn sketch() -> StyleSpec {
    StyleSpec {
        passes: vec![
            Pass::new("smooth", DENOISE_FS),
            Pass::new("edge", EDGE_FS).reads("map", Input::Pass("smooth")),
            Pass::new("main", SKETCH_FS)
                .without_map()
                .reads("edgeMap", Input::Pass("edge")),
        ],
        samplers: vec![
            SamplerSpec::image("main", "gridMap", "grid"),
            SamplerSpec::image("main", "pencilMap", "pencil-stroke"),
        ],
        curves: vec![
            Curve {
                program: "smooth",
                curve: linear,
            },
            Curve {
                program: "edge",
                curve: linear,
            },
        ],
    }
}

pub(super) fn mystery() -> StyleSpec {
    StyleSpec {
        passes: vec![
            Pass::new("smooth", DENOISE_FS),
            Pass::new("mip", PASSTHROUGH_FS)
                .reads("map", Input::Pass("smooth"))
                .mip_chain(),
            Pass::new("flat", FLAT_FS)
                .reads("map", Input::Pass("smooth"))
                .reads("mipMap", Input::Pass("mip")),
            Pass::new("grade", super::super::lut::lut_fragment()).reads("map", Input::Pass("flat")),
        ],
        samplers: vec![SamplerSpec::lut("grade", Resource::Lut("weimei"))],
        curves: vec![
            Curve {
                program: "smooth",
                curve: linear,
            },
            Curve {
                program: "flat",
                curve: linear,
            },
            Curve {
                program: "grade",
                curve: half_up,
            },
        ],
    }
}
