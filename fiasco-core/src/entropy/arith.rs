// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Adaptive arithmetic coding and decoding.

use std::io;

use crate::errors::Result;
use crate::io::{BitReader, BitWriter};

use super::{HIGH, LOW};

/// An adaptive order-n probability model over an `m`-symbol alphabet.
///
/// Symbol frequencies are kept as cumulative counts. Each of the `m^n`
/// contexts owns an independent set of `m + 1` cumulative totals. When the
/// total of a context exceeds `scale`, all counts of that context are halved
/// and re-monotonised (each total at least one larger than its predecessor).
/// A `scale` of zero selects static modelling.
pub struct Model {
    symbols: usize,
    scale: u32,
    order: usize,
    context: Vec<usize>,
    totals: Vec<u32>,
}

impl Model {
    /// Build an order-`order` model over `symbols` symbols. If `init` is
    /// given it supplies the initial per-symbol counts, otherwise every
    /// symbol starts with a count of one.
    pub fn new(symbols: usize, scale: u32, order: usize, init: Option<&[u32]>) -> Model {
        let contexts = symbols.pow(order as u32);
        let mut totals = vec![0; contexts * (symbols + 1)];

        for ctx in 0..contexts {
            let base = ctx * (symbols + 1);
            totals[base] = 0;
            for i in 1..=symbols {
                totals[base + i] =
                    totals[base + i - 1] + init.map_or(1, |counts| counts[i - 1]);
            }
        }

        Model { symbols, scale, order, context: vec![0; order], totals }
    }

    /// Base index of the totals of the current context.
    fn context_base(&self) -> usize {
        let mut index = 0;
        let mut power = 1;
        for &digit in &self.context {
            index += digit * power;
            power *= self.symbols;
        }
        index * (self.symbols + 1)
    }

    /// Shift `symbol` into the context history.
    fn push_context(&mut self, symbol: usize) {
        if self.order > 0 {
            self.context.rotate_left(1);
            self.context[self.order - 1] = symbol;
        }
    }

    /// Increment the counts of `symbol`, rescaling if the total exceeds the
    /// model scale.
    fn update(&mut self, base: usize, symbol: usize) {
        if self.scale == 0 {
            return;
        }
        for i in symbol + 1..=self.symbols {
            self.totals[base + i] += 1;
        }
        if self.totals[base + self.symbols] > self.scale {
            for i in 1..=self.symbols {
                self.totals[base + i] >>= 1;
                if self.totals[base + i] <= self.totals[base + i - 1] {
                    self.totals[base + i] = self.totals[base + i - 1] + 1;
                }
            }
        }
    }
}

/// Arithmetic encoder state.
pub struct ArithEncoder {
    low: u16,
    high: u16,
    underflow: u32,
}

impl Default for ArithEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArithEncoder {
    pub fn new() -> Self {
        ArithEncoder { low: LOW, high: HIGH, underflow: 0 }
    }

    fn rescale<W: io::Write>(&mut self, output: &mut BitWriter<W>) -> Result<()> {
        super::rescale_output(&mut self.low, &mut self.high, &mut self.underflow, output)
    }

    /// Encode `symbol` with the given probability `model`, updating both the
    /// coder interval and the model. Returns the information content of the
    /// encoded symbol in bits.
    pub fn encode_symbol<W: io::Write>(
        &mut self,
        symbol: usize,
        model: &mut Model,
        output: &mut BitWriter<W>,
    ) -> Result<f32> {
        debug_assert!(self.high > self.low);

        let base = model.context_base();
        model.push_context(symbol);

        let scale = model.totals[base + model.symbols];
        let low_count = model.totals[base + symbol];
        let high_count = model.totals[base + symbol + 1];

        let range = u32::from(self.high - self.low) + 1;
        self.high = self.low + ((range * high_count) / scale - 1) as u16;
        self.low += ((range * low_count) / scale) as u16;

        self.rescale(output)?;

        model.update(base, symbol);

        Ok(-(f64::from(high_count - low_count) / f64::from(scale)).log2() as f32)
    }

    /// Flush the encoder: emit all pending bits and align the output to a
    /// byte boundary.
    pub fn finish<W: io::Write>(mut self, output: &mut BitWriter<W>) -> Result<()> {
        self.low = self.high;
        self.rescale(output)?;
        output.byte_align()
    }
}

/// Arithmetic decoder state.
pub struct ArithDecoder {
    low: u16,
    high: u16,
    code: u16,
}

impl ArithDecoder {
    /// Initialise the decoder with the first 16 bits of the stream.
    pub fn new<R: io::Read>(input: &mut BitReader<R>) -> Result<Self> {
        Ok(ArithDecoder { low: LOW, high: HIGH, code: input.get_bits(16)? as u16 })
    }

    fn rescale<R: io::Read>(&mut self, input: &mut BitReader<R>) -> Result<()> {
        super::rescale_input(&mut self.low, &mut self.high, &mut self.code, input)
    }

    /// Decode the next symbol with the given probability `model`, updating
    /// both the coder interval and the model.
    pub fn decode_symbol<R: io::Read>(
        &mut self,
        model: &mut Model,
        input: &mut BitReader<R>,
    ) -> Result<usize> {
        debug_assert!(self.high > self.low);

        let base = model.context_base();

        let scale = model.totals[base + model.symbols];
        let range = u32::from(self.high - self.low) + 1;
        let count = ((u32::from(self.code - self.low) + 1) * scale - 1) / range;

        let mut symbol = model.symbols;
        while count < model.totals[base + symbol] {
            symbol -= 1;
        }

        model.push_context(symbol);

        let low_count = model.totals[base + symbol];
        let high_count = model.totals[base + symbol + 1];
        self.high = self.low + ((range * high_count) / scale - 1) as u16;
        self.low += ((range * low_count) / scale) as u16;

        self.rescale(input)?;

        model.update(base, symbol);

        Ok(symbol)
    }

    /// Flush the decoder by re-aligning the input to a byte boundary.
    pub fn finish<R: io::Read>(self, input: &mut BitReader<R>) {
        input.byte_align();
    }
}

/// Arithmetic coding of the symbol array `data`. If `context` is given it
/// assigns one of the adaptive models to every element; `c_symbols` holds
/// the alphabet size of each context. Models start from the uniform
/// distribution and are rescaled whenever a total exceeds `scaling`.
pub fn encode_array<W: io::Write>(
    output: &mut BitWriter<W>,
    data: &[u32],
    context: Option<&[u32]>,
    c_symbols: &[u32],
    scaling: u32,
) -> Result<()> {
    let mut models: Vec<Model> = c_symbols
        .iter()
        .map(|&m| Model::new(m as usize, scaling, 0, None))
        .collect();

    let mut encoder = ArithEncoder::new();
    for (n, &symbol) in data.iter().enumerate() {
        let c = context.map_or(0, |ctx| ctx[n] as usize);
        encoder.encode_symbol(symbol as usize, &mut models[c], output)?;
    }
    encoder.finish(output)
}

/// Arithmetic decoding of `n_data` symbols, mirroring [`encode_array`].
pub fn decode_array<R: io::Read>(
    input: &mut BitReader<R>,
    context: Option<&[u32]>,
    c_symbols: &[u32],
    n_data: usize,
    scaling: u32,
) -> Result<Vec<u32>> {
    let mut models: Vec<Model> = c_symbols
        .iter()
        .map(|&m| Model::new(m as usize, scaling, 0, None))
        .collect();

    let mut data = Vec::with_capacity(n_data);
    let mut decoder = ArithDecoder::new(input)?;
    for n in 0..n_data {
        let c = context.map_or(0, |ctx| ctx[n] as usize);
        data.push(decoder.decode_symbol(&mut models[c], input)? as u32);
    }
    decoder.finish(input);

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn round_trip(data: &[u32], symbols: usize, scale: u32, order: usize) {
        let mut writer = BitWriter::new(Vec::new());
        let mut model = Model::new(symbols, scale, order, None);
        let mut encoder = ArithEncoder::new();
        for &symbol in data {
            encoder.encode_symbol(symbol as usize, &mut model, &mut writer).unwrap();
        }
        encoder.finish(&mut writer).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes[..]);
        let mut model = Model::new(symbols, scale, order, None);
        let mut decoder = ArithDecoder::new(&mut reader).unwrap();
        for &symbol in data {
            assert_eq!(decoder.decode_symbol(&mut model, &mut reader).unwrap(), symbol as usize);
        }
    }

    #[test]
    fn verify_symbol_round_trip_orders() {
        let mut rng = SmallRng::seed_from_u64(0x1234_5678);
        let bytes: Vec<u32> = (0..4000).map(|_| rng.gen_range(0..256)).collect();

        round_trip(&bytes, 256, 8192, 0);
        round_trip(&bytes, 256, 8192, 1);

        // Higher orders over a small alphabet.
        let nibbles: Vec<u32> = bytes.iter().map(|&b| b & 0xf).collect();
        round_trip(&nibbles, 16, 8192, 2);
    }

    #[test]
    fn verify_skewed_stream_round_trip() {
        let mut rng = SmallRng::seed_from_u64(42);
        let data: Vec<u32> =
            (0..5000).map(|_| if rng.gen_range(0..100) < 95 { 0 } else { rng.gen_range(1..8) }).collect();

        round_trip(&data, 8, 256, 0);
    }

    #[test]
    fn verify_array_round_trip_with_contexts() {
        let mut rng = SmallRng::seed_from_u64(7);
        let c_symbols = [16u32, 64, 256];
        let context: Vec<u32> = (0..3000).map(|_| rng.gen_range(0..3)).collect();
        let data: Vec<u32> =
            context.iter().map(|&c| rng.gen_range(0..c_symbols[c as usize])).collect();

        let mut writer = BitWriter::new(Vec::new());
        encode_array(&mut writer, &data, Some(&context), &c_symbols, 500).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes[..]);
        let decoded = decode_array(&mut reader, Some(&context), &c_symbols, data.len(), 500).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn verify_model_with_initial_counts() {
        let init = [10u32, 1, 1, 1];
        let data = [0u32, 0, 0, 1, 2, 3, 0, 0];

        let mut writer = BitWriter::new(Vec::new());
        let mut model = Model::new(4, 50, 0, Some(&init));
        let mut encoder = ArithEncoder::new();
        for &symbol in &data {
            encoder.encode_symbol(symbol as usize, &mut model, &mut writer).unwrap();
        }
        encoder.finish(&mut writer).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes[..]);
        let mut model = Model::new(4, 50, 0, Some(&init));
        let mut decoder = ArithDecoder::new(&mut reader).unwrap();
        for &symbol in &data {
            assert_eq!(decoder.decode_symbol(&mut model, &mut reader).unwrap(), symbol as usize);
        }
    }
}
