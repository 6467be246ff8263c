//! Styles that pair an effect pass with a color grade.
//!
//! Film and TV looks grade after the effect with the "huaijiu" preset.
//! Fire, hacker, snow and constellation grade first with their own table
//! and draw the animated overlay on top.

use super::{Resource, SamplerSpec, StyleSpec};

const VIGNETTE_GLSL: &str = "
float vignette(vec2 uv, float t) {
    uv *= 1.0 - uv.yx;
    float vig = uv.x * uv.y * 15.0;
    float flicker = sin(t * 23.0) * cos(t * 8.0 + 0.5);
    return pow(vig, 0.4 + flicker * 0.05);
}
";

const OLD_FILM_HEAD: &str = "\
precision highp float;
uniform sampler2D map;
uniform sampler2D dirtMap;
uniform float time;
uniform vec2 size;
uniform float intensity;
varying vec2 vuv;
const float SEQUENCE_LENGTH = 24.0;
const float FPS = 24.0;
";

const OLD_FILM_BODY: &str = "
float easeIn(float t0, float t1, float t) {
    return 2.0 * smoothstep(t0, 2.0 * t1 - t0, t);
}
float filmDirt(vec2 pp, float scale, float t) {
    float aa = 0.1;
    vec2 lookup = pp + scale * t;
    vec3 noise = texture2D(dirtMap, 0.1 * lookup).xyz
        + texture2D(dirtMap, 0.01 * lookup).xyz
        + texture2D(dirtMap, 0.002 * lookup + 0.4).xyz;
    float seed = texture2D(dirtMap, vec2(t * 0.1, t * 0.2)).x;
    float thresh = 1.9;
    vec3 specks = smoothstep(vec3(thresh - aa), vec3(thresh + aa), noise);
    float result = clamp(seed + 0.7, 0.0, 1.0) + 0.3 * smoothstep(0.0, SEQUENCE_LENGTH, t);
    result += 0.06 * easeIn(19.2, 19.4, t);
    float band = 0.05;
    float inX = step(0.3, seed) * step(seed, 0.3 + band);
    float inY = step(0.6, seed) * step(seed, 0.6 + band);
    float inZ = step(0.9, seed) * step(seed, 0.9 + band);
    float speck = mix(1.0, specks.x, inX) * mix(1.0, specks.y, inY) * mix(1.0, specks.z, inZ);
    return result * speck;
}
float jumpCut(float t) {
    float cut1 = 7.7;
    float cut2 = 8.2;
    float jc1 = step(cut1, t);
    float jc2 = step(cut2, t);
    return 0.8 * jc1 - (jc2 - jc1) * (t - cut1) - 0.9 * jc2;
}
float limitFps(float t) {
    return floor(mod(t, SEQUENCE_LENGTH) * FPS) / FPS;
}
vec2 moveImage(vec2 uv, float t) {
    uv.x += 2.0 / size.x * (cos(t) * sin(t * 12.0 + 0.25));
    uv.y += 2.0 / size.y * (sin(t + 0.5) * cos(t * 15.0 + 0.25));
    return uv;
}
void main() {
    float scale = max(size.x, size.y) / (intensity * 31.0 + 1.0);
    vec2 qq = -scale * 0.5 + scale * vuv;
    qq.x *= size.x / size.y;
    float t = limitFps(mod(time, 1.0));
    float dirt = filmDirt(qq, scale, t + jumpCut(t));
    vec3 frame = texture2D(map, moveImage(vuv, t)).rgb;
    gl_FragColor = vec4(frame * dirt * vignette(vuv, t), 1.0);
}
";

const TV_HEAD: &str = "\
precision highp float;
uniform sampler2D map;
uniform float time;
uniform float intensity;
varying vec2 vuv;
";

const TV_BODY: &str = "
float onOff(float a, float b, float c) {
    return step(c, sin(time + a * cos(time * b)));
}
vec4 rolledVideo(vec2 look) {
    float roll = look.y - mod(time / 4.0, 1.0);
    float window = 1.0 / (1.0 + 20.0 * roll * roll);
    look.x += sin(look.y * 10.0 + time) / 50.0 * onOff(4.0, 4.0, 0.3) * (1.0 + cos(time * 80.0)) * window;
    float vShift = 0.4 * onOff(2.0, 3.0, 0.9) * (sin(time) * sin(time * 20.0) + (0.5 + 0.1 * sin(time * 200.0) * cos(time)));
    look.y = mod(look.y + vShift * (0.1 + 0.9 * intensity), 1.0);
    return texture2D(map, look);
}
vec2 screenDistort(vec2 uv) {
    uv -= vec2(0.5);
    uv = uv * 1.2 * (1.0 / 1.2 + 2.0 * uv.x * uv.x * uv.y * uv.y);
    return uv + vec2(0.5);
}
void main() {
    vec2 uv = screenDistort(vuv);
    vec3 video = rolledVideo(uv).rgb * vignette(uv, time);
    video *= (12.0 + mod(uv.y * 30.0 + time, 1.0)) / 13.0;
    gl_FragColor = vec4(video, 1.0);
}
";

const FIRE_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform sampler2D fireMap;
uniform vec2 size;
uniform float time;
uniform float intensity;
varying vec2 vuv;
void main() {
    vec2 scale = vec2(1.0, size.y / size.x) * (size.x / (512.0 - intensity * 256.0));
    vec3 color = texture2D(map, vuv).rgb;
    float scaleY = scale.y * (1.0 - intensity * 0.75);
    float t = time * (intensity + 1.0) * 0.5;
    float dist = texture2D(fireMap, vec2(vuv.x * scale.x - t * 1.1, vuv.y * scaleY - t * 1.8)).r;
    float tex = texture2D(fireMap, vec2(vuv.x * scale.x + dist * 0.2, vuv.y * scaleY - t * 1.5)).r;
    tex += vuv.y * 0.5;
    float flame = pow(max(1.0 - tex, 0.0), 2.3);
    flame -= (1.0 - abs(vuv.x - 0.5) * 2.0) * 0.5;
    vec3 tint = mix(vec3(1.0, 0.3, 0.0), vec3(0.0, 0.3, 1.0), sin(vuv.x * 3.1415926));
    vec3 fireColor = clamp(flame * 5.0 * tint, vec3(0.0), vec3(1.0));
    float glow = (fireColor.r + fireColor.g + fireColor.b) / 3.0;
    gl_FragColor = vec4(mix(color, fireColor, glow * glow * glow * (1.0 + intensity * 3.0)), 1.0);
}
";

/// Matrix rain: glyphs from a 16x16 atlas picked by a noise texture.
const HACKER_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform sampler2D textMap;
uniform sampler2D rndMap;
uniform float time;
uniform vec2 size;
uniform float intensity;
varying vec2 vuv;
float glyph(vec2 fragCoord) {
    float t = mod(time, 3.0);
    vec2 uv = mod(fragCoord, 16.0) * 0.0625;
    vec2 block = fragCoord * 0.0625 - uv;
    uv = uv * 0.8 + 0.1;
    uv += floor(texture2D(rndMap, block / 64.0 + t * (0.02 + intensity * 0.02)).xy * 16.0);
    uv *= 0.0625;
    uv.x = -uv.x;
    float g = texture2D(textMap, uv).r;
    return g * g * g * 2.0;
}
vec3 rain(vec2 fragCoord) {
    fragCoord.x -= mod(fragCoord.x, 16.0);
    float offset = sin(fragCoord.x * 15.0);
    float speed = cos(fragCoord.x * 3.0) * 0.3 + 0.7 * (1.0 + intensity * 0.5);
    float y = fract(vuv.y + time * speed + offset);
    return mix(vec3(0.1, 1.0, 0.5), vec3(0.1, 0.5, 1.0), sin(vuv.x * 3.1415926)) / (y * 20.0);
}
void main() {
    vec2 fragCoord = vuv * size;
    vec3 color = texture2D(map, vuv).rgb;
    vec3 code = glyph(fragCoord) * rain(fragCoord);
    gl_FragColor = vec4(mix(color, code, 0.35 + intensity * 0.05), 1.0);
}
";

/// Ten sheets of falling flakes; more flakes with intensity.
const SNOW_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform float time;
uniform vec2 size;
uniform float intensity;
varying vec2 vuv;
const float SHEETS = 10.0;
float rnd(float x) {
    return fract(sin(dot(vec2(x + 47.49, 38.2467 / (x + 2.3)), vec2(12.9898, 78.233))) * 43758.5453);
}
float flake(vec2 uv, vec2 center, float radius) {
    return 1.0 - smoothstep(0.0, radius, length(uv - center));
}
void main() {
    vec2 uv = vuv * size / size.x;
    float count = 20.0 + 80.0 * intensity;
    vec3 col = texture2D(map, vuv).rgb;
    for (int sheet = 1; sheet <= 10; sheet++) {
        float i = float(sheet);
        for (int n = 1; n <= 100; n++) {
            float j = float(n);
            if (j > count || j > count / i) {
                break;
            }
            float radius = 0.002 * i * (1.0 + rnd(j) / 2.0);
            float speed = radius * 0.75 + rnd(i) / 1.5;
            vec2 center = vec2(-0.3 + rnd(j * i) * 1.4 + 0.1 * cos(time + sin(j * i)), fract(sin(j) - speed * time) / 1.3);
            col += vec3((1.0 - i / SHEETS) * flake(uv, center, radius));
        }
    }
    gl_FragColor = vec4(col, 1.0);
}
";

/// Drifting constellation lines over a color-cycling tint.
const CONSTELLATION_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform vec2 size;
uniform float time;
uniform float intensity;
varying vec2 vuv;
float distLine(vec2 p, vec2 a, vec2 b) {
    vec2 ap = p - a;
    vec2 ab = b - a;
    float t = clamp(dot(ap, ab) / dot(ab, ab), 0.0, 1.0);
    return length(ap - ab * t);
}
float drawLine(vec2 uv, vec2 a, vec2 b) {
    float line = smoothstep(0.014, 0.01, distLine(uv, a, b));
    float dist = length(b - a);
    return line * (smoothstep(1.3, 0.8, dist) * 0.5 + smoothstep(0.04, 0.03, abs(dist - 0.75)));
}
float n21(vec2 i) {
    i += fract(i * vec2(223.64, 823.12));
    i += dot(i, i + 23.14);
    return fract(i.x * i.y);
}
vec2 n22(vec2 i) {
    float x = n21(i);
    return vec2(x, n21(i + x));
}
vec2 starAt(vec2 id, vec2 offset) {
    return offset + sin(n22(id + offset) * time) * 0.4;
}
float starLayer(vec2 uv) {
    float m = 0.0;
    float t = time * 2.0;
    vec2 gv = fract(uv) - 0.5;
    vec2 id = floor(uv) - 0.5;
    vec2 p[9];
    for (int k = 0; k < 9; k++) {
        p[k] = starAt(id, vec2(float(k / 3) - 1.0, float(k - (k / 3) * 3) - 1.0));
    }
    for (int k = 0; k < 9; k++) {
        m += drawLine(gv, p[4], p[k]);
        float sparkle = 0.002 / pow(length(gv - p[k]), 1.5);
        m += sparkle * (sin(t + fract(p[k].x) * 12.23) * 0.4 + 0.6);
    }
    m += drawLine(gv, p[1], p[3]);
    m += drawLine(gv, p[1], p[5]);
    m += drawLine(gv, p[7], p[3]);
    m += drawLine(gv, p[7], p[5]);
    return m;
}
void main() {
    vec2 uv = (vuv - 0.5) * size / size.y;
    vec3 c = sin(time * 2.0 * vec3(0.0, 0.324, 0.768)) * 0.4 + 0.6;
    vec3 col = texture2D(map, vuv).rgb;
    c.g += uv.x + 0.5;
    float x = sin(time * 0.1);
    float y = cos(time * 0.2);
    uv *= mat2(x, y, -y, x);
    float m = 0.0;
    for (int k = 0; k < 5; k++) {
        float z = fract(float(k) * 0.25 + time * 0.05);
        float depth = mix(15.0, 0.1, z);
        float fade = smoothstep(0.0, 1.0, z) * smoothstep(1.0, 0.9, z);
        m += starLayer(depth * uv + float(k) * 2.5) * fade;
    }
    c *= m;
    gl_FragColor = vec4(mix(col, c * (0.5 + 2.5 * intensity), 0.3), 1.0);
}
";

pub(super) fn old_film() -> StyleSpec {
    let fragment = format!("{OLD_FILM_HEAD}{VIGNETTE_GLSL}{OLD_FILM_BODY}");
    StyleSpec::graded("old", &fragment, Resource::Lut("huaijiu"))
        .sampler(SamplerSpec::image("old", "dirtMap", "dirty-map"))
}

pub(super) fn distortion() -> StyleSpec {
    let fragment = format!("{TV_HEAD}{VIGNETTE_GLSL}{TV_BODY}");
    StyleSpec::graded("tv", &fragment, Resource::Lut("huaijiu"))
}

pub(super) fn fire() -> StyleSpec {
    StyleSpec::pre_graded("main", FIRE_FS, Resource::Lut("qingcheng"))
        .sampler(SamplerSpec::image("main", "fireMap", "fire-mask"))
}

pub(super) fn hacker() -> StyleSpec {
    StyleSpec::pre_graded("main", HACKER_FS, Resource::Style("haike"))
        .sampler(SamplerSpec::image("main", "textMap", "text").placeholder([0.0, 0.0, 0.0, 1.0]))
        .sampler(SamplerSpec::image("main", "rndMap", "rnd").placeholder([0.0, 0.0, 0.0, 1.0]))
}

pub(super) fn snow() -> StyleSpec {
    StyleSpec::pre_graded("main", SNOW_FS, Resource::Style("snow"))
}

pub(super) fn constellation() -> StyleSpec {
    StyleSpec::pre_graded("main", CONSTELLATION_FS, Resource::Style("kehuan"))
}
