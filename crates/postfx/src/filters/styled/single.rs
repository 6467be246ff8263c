//! Styles drawn in one pass straight from the stage input.

use super::{SamplerSpec, StyleSpec};

const GLITCH_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform float time;
uniform float intensity;
varying vec2 vuv;
const float PI = 3.1415926;
float rand(float n) {
    return fract(sin(n) * 43758.5453123);
}
void main() {
    float maxJitter = 0.1;
    float duration = 0.3;
    float t = mod(mod(time, 1.0), duration * 2.0);
    float amplitude = max(sin(t * (PI / duration)), 0.0);
    float jitter = rand(vuv.y) * 2.0 - 1.0;
    float strength = 0.2 + intensity * 0.8;
    float tear = abs(jitter) < maxJitter * amplitude ? jitter : jitter * amplitude * 0.006;
    vec2 coords = vec2(vuv.x + tear * strength, vuv.y);
    vec4 base = texture2D(map, coords);
    vec4 red = texture2D(map, coords + vec2(0.02 * amplitude, 0.0) * strength);
    vec4 blue = texture2D(map, coords + vec2(-0.025 * amplitude, 0.0) * strength);
    gl_FragColor = vec4(red.r, base.g, blue.b, base.a);
}
";

const SHAKE_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform float time;
uniform float intensity;
varying vec2 vuv;
void main() {
    float duration = 1.0 - intensity * 0.3;
    float maxScale = 0.01 + intensity * 0.04;
    float offset = 0.01 + intensity * 0.01;
    float progress = sin(mod(time, duration) / duration * 3.1415926);
    vec2 shift = vec2(offset) * progress;
    float zoom = 1.0 + maxScale * progress;
    vec2 coords = vec2(0.5) + (vuv - vec2(0.5)) / zoom;
    vec4 red = texture2D(map, coords + shift);
    vec4 blue = texture2D(map, coords - shift);
    vec4 base = texture2D(map, coords);
    gl_FragColor = vec4(red.r, base.g, blue.b, base.a);
}
";

const SOUL_OUT_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform float time;
uniform float intensity;
varying vec2 vuv;
void main() {
    float duration = 0.8 - intensity * 0.3;
    float maxScale = 2.0 - intensity * 0.5;
    float progress = mod(time, duration) / duration;
    float alpha = 0.3 * (1.0 - progress);
    float zoom = 1.0 + (maxScale - 1.0) * progress;
    vec4 ghost = texture2D(map, vec2(0.5) + (vuv - vec2(0.5)) / zoom);
    vec4 base = texture2D(map, vuv);
    gl_FragColor = base * (1.0 - alpha) + ghost * alpha;
}
";

const WAVE_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform float time;
uniform float intensity;
varying vec2 vuv;
void main() {
    vec2 uv = vuv * (1.0 - intensity * 0.2) + 0.1 * intensity;
    uv += cos(time * vec2(6.0, 6.0) + uv * 10.0) * (0.005 + intensity * 0.015);
    gl_FragColor = texture2D(map, uv);
}
";

/// A white pulse for two beats out of every ten.
const FLASH_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform float time;
uniform float intensity;
varying vec2 vuv;
const float PI = 3.1415926;
void main() {
    float duration = 0.3 - intensity * 0.15;
    float beat = floor(time / duration);
    float phase = mod(beat, 10.0) > 1.0 ? 0.0 : mod(time, duration);
    float amplitude = abs(sin(phase * (PI / duration)));
    vec4 base = texture2D(map, vuv);
    gl_FragColor = base * (1.0 - amplitude) + vec4(1.0) * amplitude;
}
";

const WATER_FLOW_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform sampler2D flowMap;
uniform float time;
uniform float intensity;
varying vec2 vuv;
const float DEPTH = 0.02;
const vec3 LIGHT = vec3(-0.436436, 0.872872, 0.218218);
const vec3 COLOR_SUN = vec3(8.8, 8.0, 8.0);
const vec3 COLOR_SKY = vec3(0.13, 0.156, 0.182);
float lum(vec3 rgb) {
    return dot(rgb, vec3(0.299, 0.587, 0.114));
}
float depthAt(vec2 p) {
    float turbulence = 0.25 * intensity + 0.45;
    float bottom = lum(texture2D(map, p).rgb);
    p += vec2(0.0, time * (0.2 + intensity * 0.1));
    p += bottom * (0.05 + 0.05 * intensity);
    float surface = lum(texture2D(flowMap, p * turbulence).rgb) * turbulence;
    return surface * DEPTH;
}
void main() {
    float d = 0.01;
    float d0 = depthAt(vuv);
    vec2 grad = (vec2(depthAt(vuv + vec2(d, 0.0)), depthAt(vuv + vec2(0.0, d))) - d0) / d;
    vec3 normal = normalize(vec3(grad.x, grad.y, 1.0));
    float light = max(0.0, reflect(LIGHT, normal).z);
    float sun = min(1.0, pow(light * 1.5, 5.0));
    float sky = min(1.0, pow(light + 0.4, 1.2));
    vec3 specular = COLOR_SUN * sun + COLOR_SKY * sky;
    vec2 uv = vuv + refract(vec3(0.0, 0.0, 1.0), normal, 1.4).xy * DEPTH;
    vec3 col = pow(texture2D(map, uv).rgb, vec3(1.0 / 2.2));
    col += specular * 4.5;
    col = pow(max(col - 0.25, vec3(0.0)), vec3(2.3));
    gl_FragColor = vec4(col, 1.0);
}
";

/// Half-sphere lens with a thin dark rim, placed by `pos` in [0, 1]^2.
const MAGNIFIER_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform vec2 size;
uniform vec2 pos;
uniform float intensity;
varying vec2 vuv;
vec2 lens(vec2 uv, vec2 center, float radius, float refractivity) {
    vec2 c = uv - center;
    float dist = length(c);
    float angle = atan(c.x, c.y);
    float cone = clamp(1.0 - dist / radius, 0.0, 1.0);
    float dome = sqrt(1.0 - (cone - 1.0) * (cone - 1.0));
    float w = atan(1.0 - cone, dome);
    float bent = w - asin(sin(w) / refractivity);
    float depth = 1.0 - cone - sin(bent) * dome / cos(bent);
    vec2 refracted = center + vec2(sin(angle), cos(angle)) * depth * radius;
    return mix(uv, refracted, step(dist, radius));
}
void main() {
    vec2 aspect = vec2(1.0, size.y / size.x);
    vec2 uv = 0.5 + (vuv - 0.5) * aspect;
    float yOffset = (size.x - size.y) / size.x / 2.0;
    float maxScale = min(size.x, size.y) / (2.0 * size.x);
    float radius = maxScale * 0.3 + maxScale * 0.7 * intensity;
    vec2 center = mix(vec2(radius, radius + yOffset), vec2(1.0 - radius, 1.0 - radius - yOffset), pos);
    vec2 bent = lens(uv, center, radius, 1.5 + intensity * intensity * 0.5);
    bent = 0.5 + (bent - 0.5) / aspect;
    float ring = smoothstep(0.0, 2.0 / max(size.x, size.y), abs(radius - length(uv - center)));
    gl_FragColor = vec4(mix(vec3(0.0), texture2D(map, bent).rgb, ring), 1.0);
}
";

pub(super) fn glitch() -> StyleSpec {
    StyleSpec::single(GLITCH_FS)
}

pub(super) fn shake() -> StyleSpec {
    StyleSpec::single(SHAKE_FS)
}

pub(super) fn soul_out() -> StyleSpec {
    StyleSpec::single(SOUL_OUT_FS)
}

pub(super) fn wave() -> StyleSpec {
    StyleSpec::single(WAVE_FS)
}

pub(super) fn flash() -> StyleSpec {
    StyleSpec::single(FLASH_FS)
}

pub(super) fn water_flow() -> StyleSpec {
    StyleSpec::single(WATER_FLOW_FS)
        .sampler(SamplerSpec::image("main", "flowMap", "dirty-map").placeholder([0.5, 0.5, 0.5, 1.0]))
}

pub(super) fn magnifier() -> StyleSpec {
    StyleSpec::single(MAGNIFIER_FS)
}
