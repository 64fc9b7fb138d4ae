// CUDA kernel source, compiled to PTX at runtime via NVRTC
//
// Two kernels, each instantiated for float and double:
//
//   propagate_{f32,f64}: one block per active row. The block accumulates one
//     column slab at a time in shared memory (`col_blk` values), then writes
//     the slab's activated outputs and adds their nonzero count to the row
//     length.
//   identify_{f32,f64}: one thread per row, argmax over the row with the
//     lowest index winning ties and an all-nonpositive row reporting -1.
//
// The packed record is passed as a raw byte pointer: `n_slab * neurons + 1`
// row pointers, then the column indices, then (after padding) the values at
// element offset `value_offset`.

/// All kernel source code in one compilation unit.
pub const KERNEL_SOURCE: &str = r#"

#define SPARROW_KERNELS(T, SUFFIX)                                              \
extern "C" __global__ void propagate_##SUFFIX(                                  \
    const T* y_in,                                                              \
    const unsigned int* rows_in,                                                \
    const unsigned char* w,                                                     \
    unsigned int col_blk,                                                       \
    unsigned int n_slab,                                                        \
    unsigned int neurons,                                                       \
    unsigned int value_offset,                                                  \
    double bias,                                                                \
    double ymax,                                                                \
    T* y_out,                                                                   \
    unsigned int* rlen_out)                                                     \
{                                                                               \
    extern __shared__ __align__(8) unsigned char smem_##SUFFIX[];               \
    T* acc = (T*)smem_##SUFFIX;                                                 \
    __shared__ unsigned int count;                                              \
                                                                                \
    const unsigned int row = rows_in[blockIdx.x];                               \
    const unsigned int* row_ptr = (const unsigned int*)w;                       \
    const unsigned int* col_idx = row_ptr + n_slab * neurons + 1;               \
    const T* vals = ((const T*)w) + value_offset;                               \
    const T* y = y_in + (size_t)row * neurons;                                  \
    T* out = y_out + (size_t)row * neurons;                                     \
    const unsigned int tid = threadIdx.y * blockDim.x + threadIdx.x;            \
    const unsigned int nthreads = blockDim.x * blockDim.y;                      \
                                                                                \
    if (tid == 0) count = 0;                                                    \
    for (unsigned int slab = 0; slab < n_slab; ++slab) {                        \
        const unsigned int base = slab * col_blk;                               \
        for (unsigned int c = tid; c < col_blk; c += nthreads) acc[c] = (T)0;   \
        __syncthreads();                                                        \
                                                                                \
        for (unsigned int r = tid; r < neurons; r += nthreads) {                \
            const T v = y[r];                                                   \
            if (v == (T)0) continue;                                            \
            const unsigned int at = slab * neurons + r;                         \
            for (unsigned int k = row_ptr[at]; k < row_ptr[at + 1]; ++k) {      \
                atomicAdd(&acc[col_idx[k] - base], v * vals[k]);                \
            }                                                                   \
        }                                                                       \
        __syncthreads();                                                        \
                                                                                \
        unsigned int local = 0;                                                 \
        for (unsigned int c = tid; c < col_blk; c += nthreads) {                \
            T v = acc[c] + (T)bias;                                             \
            if (v > (T)ymax) v = (T)ymax;                                       \
            else if (!(v > (T)0)) v = (T)0;                                     \
            out[base + c] = v;                                                  \
            if (v > (T)0) ++local;                                              \
        }                                                                       \
        if (local) atomicAdd(&count, local);                                    \
        __syncthreads();                                                        \
    }                                                                           \
    if (tid == 0) rlen_out[row] = count;                                        \
}                                                                               \
                                                                                \
extern "C" __global__ void identify_##SUFFIX(                                   \
    const T* y,                                                                 \
    unsigned int neurons,                                                       \
    unsigned int num_rows,                                                      \
    int* results)                                                               \
{                                                                               \
    unsigned int row = blockIdx.x * blockDim.x + threadIdx.x;                   \
    if (row >= num_rows) return;                                                \
    const T* r = y + (size_t)row * neurons;                                     \
    int best = -1;                                                              \
    T best_v = (T)0;                                                            \
    for (unsigned int c = 0; c < neurons; ++c) {                                \
        if (r[c] > best_v) { best_v = r[c]; best = (int)c; }                    \
    }                                                                           \
    results[row] = best;                                                        \
}

SPARROW_KERNELS(float, f32)
SPARROW_KERNELS(double, f64)
"#;

/// Names of the kernels exported by `KERNEL_SOURCE`.
pub const KERNEL_NAMES: &[&str] = &["propagate_f32", "propagate_f64", "identify_f32", "identify_f64"];

/// Module name used when loading the PTX.
pub const MODULE_NAME: &str = "sparrow_kernels";
