//! WGSL source generation for the kernel families.
//!
//! Device buffers always store `array<u32>` words; 8- and 16-bit pixel
//! types pack several elements per word. Each program variant is the
//! family template prefixed with a generated per-type preamble that
//! defines the element accessors (lane extraction, sign extension,
//! encode masks). Kernels that write sub-word elements process one whole
//! word per invocation so stores never race.

use pix_core::PixelType;

/// Workgroup size used by every 1-D kernel.
pub(crate) const WORKGROUP_SIZE: u32 = 256;

/// Per-type accessor preamble.
///
/// Defines `Elem`, `LANES`, `ELEM_LO`/`ELEM_HI` and the
/// `lane_extract`/`lane_insert`/`elem_dec`/`elem_enc`/`elem_to_f32`/
/// `elem_from_f32` helpers the family templates build on.
pub(crate) fn preamble(pixel: PixelType) -> String {
    let lo = pixel.min_value();
    let hi = pixel.max_value();
    match pixel {
        PixelType::U8 | PixelType::U16 => {
            let bits = pixel.size_bytes() as u32 * 8;
            let lanes = 32 / bits;
            let mask = (1u64 << bits) - 1;
            format!(
                "alias Elem = u32;\n\
                 const LANES: u32 = {lanes}u;\n\
                 const ELEM_LO: f32 = {lo:e};\n\
                 const ELEM_HI: f32 = {hi:e};\n\
                 fn lane_extract(w: u32, lane: u32) -> u32 {{ return (w >> (lane * {bits}u)) & {mask:#x}u; }}\n\
                 fn lane_insert(w: u32, lane: u32, bits: u32) -> u32 {{\n\
                 \x20   let shift = lane * {bits}u;\n\
                 \x20   return (w & ~({mask:#x}u << shift)) | ((bits & {mask:#x}u) << shift);\n\
                 }}\n\
                 fn elem_dec(bits: u32) -> Elem {{ return bits; }}\n\
                 fn elem_enc(v: Elem) -> u32 {{ return v & {mask:#x}u; }}\n\
                 fn elem_to_f32(v: Elem) -> f32 {{ return f32(v); }}\n\
                 fn elem_from_f32(x: f32) -> Elem {{ return u32(x); }}\n"
            )
        }
        PixelType::I8 | PixelType::I16 => {
            let bits = pixel.size_bytes() as u32 * 8;
            let lanes = 32 / bits;
            let mask = (1u64 << bits) - 1;
            let shift = 32 - bits;
            format!(
                "alias Elem = i32;\n\
                 const LANES: u32 = {lanes}u;\n\
                 const ELEM_LO: f32 = {lo:e};\n\
                 const ELEM_HI: f32 = {hi:e};\n\
                 fn lane_extract(w: u32, lane: u32) -> u32 {{ return (w >> (lane * {bits}u)) & {mask:#x}u; }}\n\
                 fn lane_insert(w: u32, lane: u32, bits: u32) -> u32 {{\n\
                 \x20   let shift = lane * {bits}u;\n\
                 \x20   return (w & ~({mask:#x}u << shift)) | ((bits & {mask:#x}u) << shift);\n\
                 }}\n\
                 fn elem_dec(bits: u32) -> Elem {{ return bitcast<i32>(bits << {shift}u) >> {shift}u; }}\n\
                 fn elem_enc(v: Elem) -> u32 {{ return bitcast<u32>(v) & {mask:#x}u; }}\n\
                 fn elem_to_f32(v: Elem) -> f32 {{ return f32(v); }}\n\
                 fn elem_from_f32(x: f32) -> Elem {{ return i32(x); }}\n"
            )
        }
        PixelType::U32 => format!(
            "alias Elem = u32;\n\
             const LANES: u32 = 1u;\n\
             const ELEM_LO: f32 = {lo:e};\n\
             const ELEM_HI: f32 = {hi:e};\n\
             fn lane_extract(w: u32, lane: u32) -> u32 {{ return w; }}\n\
             fn lane_insert(w: u32, lane: u32, bits: u32) -> u32 {{ return bits; }}\n\
             fn elem_dec(bits: u32) -> Elem {{ return bits; }}\n\
             fn elem_enc(v: Elem) -> u32 {{ return v; }}\n\
             fn elem_to_f32(v: Elem) -> f32 {{ return f32(v); }}\n\
             fn elem_from_f32(x: f32) -> Elem {{ return u32(x); }}\n"
        ),
        PixelType::I32 => format!(
            "alias Elem = i32;\n\
             const LANES: u32 = 1u;\n\
             const ELEM_LO: f32 = {lo:e};\n\
             const ELEM_HI: f32 = {hi:e};\n\
             fn lane_extract(w: u32, lane: u32) -> u32 {{ return w; }}\n\
             fn lane_insert(w: u32, lane: u32, bits: u32) -> u32 {{ return bits; }}\n\
             fn elem_dec(bits: u32) -> Elem {{ return bitcast<i32>(bits); }}\n\
             fn elem_enc(v: Elem) -> u32 {{ return bitcast<u32>(v); }}\n\
             fn elem_to_f32(v: Elem) -> f32 {{ return f32(v); }}\n\
             fn elem_from_f32(x: f32) -> Elem {{ return i32(x); }}\n"
        ),
        PixelType::F32 => format!(
            "alias Elem = f32;\n\
             const LANES: u32 = 1u;\n\
             const ELEM_LO: f32 = {lo:e};\n\
             const ELEM_HI: f32 = {hi:e};\n\
             fn lane_extract(w: u32, lane: u32) -> u32 {{ return w; }}\n\
             fn lane_insert(w: u32, lane: u32, bits: u32) -> u32 {{ return bits; }}\n\
             fn elem_dec(bits: u32) -> Elem {{ return bitcast<f32>(bits); }}\n\
             fn elem_enc(v: Elem) -> u32 {{ return bitcast<u32>(v); }}\n\
             fn elem_to_f32(v: Elem) -> f32 {{ return v; }}\n\
             fn elem_from_f32(x: f32) -> Elem {{ return x; }}\n"
        ),
    }
}

/// Bindings and loaders shared by the elementwise family templates.
const ELEMWISE_SCAFFOLD: &str = "\
struct Dims { total: u32, words: u32, pad0: u32, pad1: u32 }
struct Params { a: f32, b: f32, c: f32, d: f32 }

@group(0) @binding(0) var<storage, read> src1: array<u32>;
@group(0) @binding(1) var<storage, read> src2: array<u32>;
@group(0) @binding(2) var<storage, read_write> dst: array<u32>;
@group(0) @binding(3) var<uniform> dims: Dims;
@group(0) @binding(4) var<uniform> params: Params;

fn load1(i: u32) -> Elem { return elem_dec(lane_extract(src1[i / LANES], i % LANES)); }
fn load2(i: u32) -> Elem { return elem_dec(lane_extract(src2[i / LANES], i % LANES)); }
";

/// Entry point computing `expr` from two image elements `a` and `b`.
fn binary_entry(name: &str, expr: &str) -> String {
    format!(
        "\n@compute @workgroup_size({WORKGROUP_SIZE})\n\
         fn {name}(@builtin(global_invocation_id) gid: vec3<u32>) {{\n\
         \x20   let w = gid.x;\n\
         \x20   if w >= dims.words {{ return; }}\n\
         \x20   var out = 0u;\n\
         \x20   for (var l = 0u; l < LANES; l = l + 1u) {{\n\
         \x20       let i = w * LANES + l;\n\
         \x20       if i < dims.total {{\n\
         \x20           let a = load1(i);\n\
         \x20           let b = load2(i);\n\
         \x20           out = lane_insert(out, l, elem_enc({expr}));\n\
         \x20       }}\n\
         \x20   }}\n\
         \x20   dst[w] = out;\n\
         }}\n"
    )
}

/// Entry point computing `expr` from one image element `a`; `setup`
/// statements (for scalar parameters) run once before the lane loop.
fn unary_entry(name: &str, setup: &str, expr: &str) -> String {
    format!(
        "\n@compute @workgroup_size({WORKGROUP_SIZE})\n\
         fn {name}(@builtin(global_invocation_id) gid: vec3<u32>) {{\n\
         \x20   let w = gid.x;\n\
         \x20   if w >= dims.words {{ return; }}\n\
         {setup}\
         \x20   var out = 0u;\n\
         \x20   for (var l = 0u; l < LANES; l = l + 1u) {{\n\
         \x20       let i = w * LANES + l;\n\
         \x20       if i < dims.total {{\n\
         \x20           let a = load1(i);\n\
         \x20           out = lane_insert(out, l, elem_enc({expr}));\n\
         \x20       }}\n\
         \x20   }}\n\
         \x20   dst[w] = out;\n\
         }}\n"
    )
}

/// Arithmetic family: wrapping integer semantics, native float.
pub(crate) fn arith_source(pixel: PixelType) -> String {
    let float = pixel.is_float();
    let mut s = preamble(pixel);
    s.push_str(ELEMWISE_SCAFFOLD);

    let abs_diff = if float { "abs(a - b)" } else { "max(a, b) - min(a, b)" };
    let div = if float {
        "a / b"
    } else {
        "select(a / max(b, Elem(1)), Elem(0), b == Elem(0))"
    };
    for (name, expr) in [
        ("add", "a + b"),
        ("sub", "a - b"),
        ("mul", "a * b"),
        ("div", div),
        ("abs_diff", abs_diff),
        ("min_img", "min(a, b)"),
        ("max_img", "max(a, b)"),
    ] {
        s.push_str(&binary_entry(name, expr));
    }

    let scalar_setup = "\x20   let s = elem_from_f32(params.a);\n";
    s.push_str(&unary_entry("add_scalar", scalar_setup, "a + s"));
    s.push_str(&unary_entry("mul_scalar", scalar_setup, "a * s"));
    s
}

/// Logic family: width-agnostic bitwise kernels over packed words.
///
/// One source serves every integer variant; scalar masks arrive
/// pre-broadcast from the host.
pub(crate) fn logic_source(_pixel: PixelType) -> String {
    let mut s = String::from(
        "struct Dims { total: u32, words: u32, pad0: u32, pad1: u32 }\n\
         struct Params { mask: u32, pad0: u32, pad1: u32, pad2: u32 }\n\
         \n\
         @group(0) @binding(0) var<storage, read> src1: array<u32>;\n\
         @group(0) @binding(1) var<storage, read> src2: array<u32>;\n\
         @group(0) @binding(2) var<storage, read_write> dst: array<u32>;\n\
         @group(0) @binding(3) var<uniform> dims: Dims;\n\
         @group(0) @binding(4) var<uniform> params: Params;\n",
    );
    for (name, expr) in [
        ("and_img", "src1[w] & src2[w]"),
        ("or_img", "src1[w] | src2[w]"),
        ("xor_img", "src1[w] ^ src2[w]"),
        ("not_img", "~src1[w]"),
        ("and_scalar", "src1[w] & params.mask"),
        ("or_scalar", "src1[w] | params.mask"),
        ("xor_scalar", "src1[w] ^ params.mask"),
    ] {
        s.push_str(&format!(
            "\n@compute @workgroup_size({WORKGROUP_SIZE})\n\
             fn {name}(@builtin(global_invocation_id) gid: vec3<u32>) {{\n\
             \x20   let w = gid.x;\n\
             \x20   if w >= dims.words {{ return; }}\n\
             \x20   dst[w] = {expr};\n\
             }}\n"
        ));
    }
    s
}

/// Threshold family: compare in f32, replace or binarize.
pub(crate) fn threshold_source(pixel: PixelType) -> String {
    let mut s = preamble(pixel);
    s.push_str(ELEMWISE_SCAFFOLD);
    let setup = "\x20   let t = params.a;\n\x20   let rep = elem_from_f32(params.b);\n";
    s.push_str(&unary_entry("thresh_gt", setup, "select(a, rep, elem_to_f32(a) > t)"));
    s.push_str(&unary_entry("thresh_lt", setup, "select(a, rep, elem_to_f32(a) < t)"));
    let bin_setup = "\x20   let t = params.a;\n";
    s.push_str(&unary_entry("binarize", bin_setup, "select(Elem(0), Elem(1), elem_to_f32(a) > t)"));
    s
}

/// Conversion family: copy, and scale with explicit clamping to the
/// destination range (the one place integer results clamp instead of
/// wrapping).
pub(crate) fn convert_source(pixel: PixelType) -> String {
    let mut s = preamble(pixel);
    s.push_str(ELEMWISE_SCAFFOLD);
    s.push_str(&unary_entry("copy", "", "a"));
    s.push_str(&unary_entry(
        "scale",
        "",
        "elem_from_f32(clamp(elem_to_f32(a) * params.a + params.b, ELEM_LO, ELEM_HI))",
    ));
    s
}

const F32_MAX: &str = "3.40282347e+38";

/// Reduction family: one partial per workgroup, grid-stride loads,
/// shared-memory tree combine. The host folds the partials.
pub(crate) fn reduce_source(pixel: PixelType) -> String {
    let mut s = preamble(pixel);
    s.push_str(
        "struct Dims { total: u32, pad0: u32, pad1: u32, pad2: u32 }\n\
         \n\
         @group(0) @binding(0) var<storage, read> src: array<u32>;\n\
         @group(0) @binding(1) var<storage, read_write> partials: array<f32>;\n\
         @group(0) @binding(2) var<uniform> dims: Dims;\n\
         \n\
         var<workgroup> scratch: array<f32, 256>;\n\
         \n\
         fn load_src(i: u32) -> f32 { return elem_to_f32(elem_dec(lane_extract(src[i / LANES], i % LANES))); }\n",
    );

    // (entry, identity, accumulate expr, tree combine expr)
    let entries: [(&str, String, &str, &str); 7] = [
        ("reduce_min", F32_MAX.to_string(), "min(acc, v)", "min"),
        ("reduce_max", format!("-{F32_MAX}"), "max(acc, v)", "max"),
        ("reduce_min_abs", F32_MAX.to_string(), "min(acc, abs(v))", "min"),
        ("reduce_max_abs", "0.0".to_string(), "max(acc, abs(v))", "max"),
        ("reduce_sum", "0.0".to_string(), "acc + v", "add"),
        ("reduce_sum_sqr", "0.0".to_string(), "acc + v * v", "add"),
        ("reduce_count_nz", "0.0".to_string(), "acc + select(0.0, 1.0, v != 0.0)", "add"),
    ];
    for (name, identity, accumulate, tree) in entries {
        let tree_expr = match tree {
            "min" => "min(scratch[lid.x], scratch[lid.x + ofs])",
            "max" => "max(scratch[lid.x], scratch[lid.x + ofs])",
            _ => "scratch[lid.x] + scratch[lid.x + ofs]",
        };
        s.push_str(&format!(
            "\n@compute @workgroup_size({WORKGROUP_SIZE})\n\
             fn {name}(@builtin(local_invocation_id) lid: vec3<u32>,\n\
             \x20         @builtin(workgroup_id) wid: vec3<u32>,\n\
             \x20         @builtin(num_workgroups) nwg: vec3<u32>) {{\n\
             \x20   var acc: f32 = {identity};\n\
             \x20   var i = wid.x * {WORKGROUP_SIZE}u + lid.x;\n\
             \x20   let stride = nwg.x * {WORKGROUP_SIZE}u;\n\
             \x20   while i < dims.total {{\n\
             \x20       let v = load_src(i);\n\
             \x20       acc = {accumulate};\n\
             \x20       i = i + stride;\n\
             \x20   }}\n\
             \x20   scratch[lid.x] = acc;\n\
             \x20   workgroupBarrier();\n\
             \x20   var ofs = {half}u;\n\
             \x20   while ofs > 0u {{\n\
             \x20       if lid.x < ofs {{\n\
             \x20           scratch[lid.x] = {tree_expr};\n\
             \x20       }}\n\
             \x20       workgroupBarrier();\n\
             \x20       ofs = ofs / 2u;\n\
             \x20   }}\n\
             \x20   if lid.x == 0u {{\n\
             \x20       partials[wid.x] = scratch[0];\n\
             \x20   }}\n\
             }}\n",
            half = WORKGROUP_SIZE / 2,
        ));
    }
    s
}

/// Blob labeling family: provisional-label init plus iterative
/// min-propagation with a device-side changed flag.
pub(crate) fn blob_source(pixel: PixelType) -> String {
    let mut s = preamble(pixel);
    s.push_str(&format!(
        "struct Dims {{ width: u32, height: u32, total: u32, conn: u32 }}\n\
         \n\
         @group(0) @binding(0) var<storage, read> src: array<u32>;\n\
         @group(0) @binding(1) var<storage, read_write> labels: array<u32>;\n\
         @group(0) @binding(2) var<storage, read_write> changed: atomic<u32>;\n\
         @group(0) @binding(3) var<uniform> dims: Dims;\n\
         \n\
         const SENTINEL: u32 = 0xffffffffu;\n\
         \n\
         fn load_src(i: u32) -> f32 {{ return elem_to_f32(elem_dec(lane_extract(src[i / LANES], i % LANES))); }}\n\
         \n\
         @compute @workgroup_size({WORKGROUP_SIZE})\n\
         fn blob_init(@builtin(global_invocation_id) gid: vec3<u32>) {{\n\
         \x20   let i = gid.x;\n\
         \x20   if i >= dims.total {{ return; }}\n\
         \x20   if load_src(i) != 0.0 {{\n\
         \x20       labels[i] = i;\n\
         \x20   }} else {{\n\
         \x20       labels[i] = SENTINEL;\n\
         \x20   }}\n\
         }}\n\
         \n\
         @compute @workgroup_size(16, 16)\n\
         fn blob_propagate(@builtin(global_invocation_id) gid: vec3<u32>) {{\n\
         \x20   let x = gid.x;\n\
         \x20   let y = gid.y;\n\
         \x20   if x >= dims.width || y >= dims.height {{ return; }}\n\
         \x20   let idx = y * dims.width + x;\n\
         \x20   let cur = labels[idx];\n\
         \x20   if cur == SENTINEL {{ return; }}\n\
         \x20   var best = cur;\n\
         \x20   if x > 0u {{ best = min(best, labels[idx - 1u]); }}\n\
         \x20   if x + 1u < dims.width {{ best = min(best, labels[idx + 1u]); }}\n\
         \x20   if y > 0u {{ best = min(best, labels[idx - dims.width]); }}\n\
         \x20   if y + 1u < dims.height {{ best = min(best, labels[idx + dims.width]); }}\n\
         \x20   if dims.conn == 8u {{\n\
         \x20       if x > 0u && y > 0u {{ best = min(best, labels[idx - dims.width - 1u]); }}\n\
         \x20       if x + 1u < dims.width && y > 0u {{ best = min(best, labels[idx - dims.width + 1u]); }}\n\
         \x20       if x > 0u && y + 1u < dims.height {{ best = min(best, labels[idx + dims.width - 1u]); }}\n\
         \x20       if x + 1u < dims.width && y + 1u < dims.height {{ best = min(best, labels[idx + dims.width + 1u]); }}\n\
         \x20   }}\n\
         \x20   if best < cur {{\n\
         \x20       labels[idx] = best;\n\
         \x20       atomicStore(&changed, 1u);\n\
         \x20   }}\n\
         }}\n"
    ));
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_lanes() {
        assert!(preamble(PixelType::U8).contains("const LANES: u32 = 4u;"));
        assert!(preamble(PixelType::I16).contains("const LANES: u32 = 2u;"));
        assert!(preamble(PixelType::F32).contains("const LANES: u32 = 1u;"));
    }

    #[test]
    fn test_signed_preamble_sign_extends() {
        let p = preamble(PixelType::I8);
        assert!(p.contains("bitcast<i32>(bits << 24u) >> 24u"));
        let p = preamble(PixelType::I16);
        assert!(p.contains("bitcast<i32>(bits << 16u) >> 16u"));
    }

    #[test]
    fn test_arith_entries_present() {
        let s = arith_source(PixelType::U8);
        for entry in ["fn add(", "fn sub(", "fn mul(", "fn div(", "fn abs_diff(", "fn add_scalar("] {
            assert!(s.contains(entry), "missing {entry}");
        }
    }

    #[test]
    fn test_integer_div_is_guarded() {
        let s = arith_source(PixelType::U16);
        assert!(s.contains("b == Elem(0)"));
        let s = arith_source(PixelType::F32);
        assert!(!s.contains("b == Elem(0)"));
    }

    #[test]
    fn test_logic_source_is_type_independent() {
        assert_eq!(logic_source(PixelType::U8), logic_source(PixelType::I32));
        assert!(logic_source(PixelType::U8).contains("fn not_img("));
    }

    #[test]
    fn test_reduce_entries_present() {
        let s = reduce_source(PixelType::F32);
        for entry in [
            "fn reduce_min(",
            "fn reduce_max(",
            "fn reduce_sum(",
            "fn reduce_sum_sqr(",
            "fn reduce_count_nz(",
        ] {
            assert!(s.contains(entry), "missing {entry}");
        }
        assert!(s.contains("workgroupBarrier()"));
    }

    #[test]
    fn test_blob_entries_present() {
        let s = blob_source(PixelType::U8);
        assert!(s.contains("fn blob_init("));
        assert!(s.contains("fn blob_propagate("));
        assert!(s.contains("SENTINEL: u32 = 0xffffffffu"));
    }
}
