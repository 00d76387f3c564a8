//! Continuous reception tests: double buffer, UART and ADC

mod common;

use std::sync::atomic::Ordering;

use common::{FakeAdc, FakeUart};
use proptest::prelude::*;
use rtbus::bsp::adc::{AdcConfig, AdcRegistry, ReferenceVoltage};
use rtbus::bsp::uart::{UartConfig, UartRegistry};
use rtbus::bsp::{DoubleBuffer, TransferMode};
use rtbus::osal::host::Host;
use rtbus::{OsalError, NO_WAIT};

use TransferMode::{Blocking, Dma, Interrupt};

const TIMEOUT: u32 = 500;

fn frame(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_mul(31).wrapping_add(i as u8)).collect()
}

fn uart(rx_mode: TransferMode, rx_len: usize, expected_len: usize) -> UartConfig {
    UartConfig {
        tx_mode: Blocking,
        rx_mode,
        rx_len,
        expected_len,
    }
}

#[cfg(test)]
mod double_buffer_props {
    use super::*;

    proptest! {
        #[test]
        fn test_reader_sees_last_completed_cycle(
            frames in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..=32), 1..20)
        ) {
            let buffer: DoubleBuffer<u8, 32> = DoubleBuffer::new(0);
            let mut slot = buffer.producer_slot(32);

            for data in &frames {
                // SAFETY: this loop is the only producer.
                unsafe { slot.as_mut_slice()[..data.len()].copy_from_slice(data) };
                slot = buffer.complete(data.len(), 32);
            }

            let mut out = [0u8; 32];
            let n = buffer.read(&mut out).unwrap();
            let last = frames.last().unwrap();
            prop_assert_eq!(&out[..n], &last[..]);
            prop_assert_eq!(buffer.sequence() as usize, frames.len());
            prop_assert_eq!(buffer.ready_len(), last.len());
            // The producer never targets the slot readers copy from
            prop_assert_ne!(slot.as_ptr(), buffer.dedicated(32).as_ptr());
        }

        #[test]
        fn test_short_reads_truncate(len in 1usize..=32, out_len in 0usize..40) {
            let buffer: DoubleBuffer<u8, 32> = DoubleBuffer::new(0xEE);
            buffer.complete(len, 32);

            let mut out = vec![0u8; out_len];
            let n = buffer.read(&mut out).unwrap();
            prop_assert_eq!(n, len.min(out_len));
        }
    }
}

#[cfg(test)]
mod uart_tests {
    use super::*;

    #[test]
    fn test_dma_idle_lengths() {
        static HAL: FakeUart = FakeUart::new(6);
        static UART: UartRegistry<Host, FakeUart, 3, 32> = UartRegistry::new();

        let h = UART.register(&HAL, uart(Dma, 32, 0)).unwrap();
        assert_eq!(HAL.armed_len(), Some(32));

        for (seed, len) in [(1, 10), (2, 32), (3, 5)] {
            let data = frame(seed, len);
            assert_eq!(HAL.deliver(&data), len);
            // Size from the glue is ignored, the stream counter decides
            Host::interrupt(|| UART.on_rx_event(h, 0));

            let mut out = [0u8; 64];
            assert_eq!(UART.read(h, &mut out, TIMEOUT), Ok(len));
            assert_eq!(&out[..len], &data[..]);
        }
        assert_eq!(HAL.arms.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_error_rearms_reception() {
        static HAL: FakeUart = FakeUart::new(1);
        static UART: UartRegistry<Host, FakeUart, 3, 32> = UartRegistry::new();

        let h = UART.register(&HAL, uart(Interrupt, 16, 0)).unwrap();
        HAL.deliver(b"garb");
        Host::interrupt(|| UART.on_error(h));

        assert_eq!(HAL.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(HAL.armed_len(), Some(16));
        let mut out = [0u8; 16];
        assert_eq!(UART.read(h, &mut out, TIMEOUT), Err(OsalError::Error));

        // Nobody re-armed by hand, the next frame still arrives
        HAL.deliver(b"hello");
        Host::interrupt(|| UART.on_rx_event(h, 5));
        assert_eq!(UART.read(h, &mut out, TIMEOUT), Ok(5));
        assert_eq!(&out[..5], b"hello");
    }

    #[test]
    fn test_fixed_length_frames() {
        static HAL: FakeUart = FakeUart::new(1);
        static UART: UartRegistry<Host, FakeUart, 3, 32> = UartRegistry::new();

        let h = UART.register(&HAL, uart(Dma, 32, 8)).unwrap();
        assert_eq!(HAL.armed_len(), Some(8));

        let data = frame(9, 8);
        HAL.deliver(&data);
        Host::interrupt(|| UART.on_rx_event(h, 8));
        let mut out = [0u8; 32];
        assert_eq!(UART.read(h, &mut out, TIMEOUT), Ok(8));
        assert_eq!(&out[..8], &data[..]);
    }

    #[test]
    fn test_failed_rearm_keeps_data() {
        static HAL: FakeUart = FakeUart::new(1);
        static UART: UartRegistry<Host, FakeUart, 3, 32> = UartRegistry::new();

        let h = UART.register(&HAL, uart(Interrupt, 16, 0)).unwrap();
        HAL.deliver(b"abc");
        HAL.fail_arm.store(true, Ordering::SeqCst);
        Host::interrupt(|| UART.on_rx_event(h, 3));

        let mut out = [0u8; 16];
        assert_eq!(UART.read(h, &mut out, TIMEOUT), Ok(3));
        assert_eq!(HAL.armed_len(), None);
    }

    #[test]
    fn test_blocking_read() {
        static HAL: FakeUart = FakeUart::new(1);
        static UART: UartRegistry<Host, FakeUart, 3, 32> = UartRegistry::new();

        let h = UART.register(&HAL, uart(Blocking, 32, 0)).unwrap();
        assert_eq!(HAL.armed_len(), None);

        HAL.queue_blocking(b"AT+OK");
        let mut out = [0u8; 32];
        assert_eq!(UART.read(h, &mut out, TIMEOUT), Ok(5));
        assert_eq!(&out[..5], b"AT+OK");

        let mut latest = [0u8; 32];
        assert_eq!(UART.read_latest(h, &mut latest), Ok(5));
        assert_eq!(UART.read(h, &mut out, TIMEOUT), Err(OsalError::Error));
    }

    #[test]
    fn test_read_times_out() {
        static HAL: FakeUart = FakeUart::new(1);
        static UART: UartRegistry<Host, FakeUart, 3, 32> = UartRegistry::new();

        let h = UART.register(&HAL, uart(Dma, 32, 0)).unwrap();
        let mut out = [0u8; 8];
        assert_eq!(UART.read(h, &mut out, NO_WAIT), Err(OsalError::Timeout));
        assert_eq!(UART.read(h, &mut out, 5), Err(OsalError::Timeout));
        assert_eq!(UART.read(h, &mut [], 5), Err(OsalError::InvalidParam));
    }

    #[test]
    fn test_send() {
        static HAL: FakeUart = FakeUart::new(1);
        static UART: UartRegistry<Host, FakeUart, 3, 32> = UartRegistry::new();

        let config = UartConfig {
            tx_mode: Interrupt,
            ..uart(Blocking, 32, 0)
        };
        let h = UART.register(&HAL, config).unwrap();
        HAL.completion.set(move |_| UART.on_tx_complete(h));

        assert_eq!(UART.send(h, b"hello "), Ok(6));
        assert_eq!(UART.send_timeout(h, b"world", TIMEOUT), Ok(5));
        assert_eq!(HAL.sent(), b"hello world");
        assert_eq!(UART.send(h, b""), Err(OsalError::InvalidParam));
    }

    #[test]
    fn test_rx_error_leaves_send_alone() {
        static HAL: FakeUart = FakeUart::new(1);
        static UART: UartRegistry<Host, FakeUart, 3, 32> = UartRegistry::new();

        let config = UartConfig {
            tx_mode: Interrupt,
            ..uart(Dma, 32, 0)
        };
        let h = UART.register(&HAL, config).unwrap();
        HAL.completion.set(move |_| UART.on_tx_complete(h));

        Host::interrupt(|| UART.on_error(h));
        assert_eq!(UART.send_timeout(h, b"hello", TIMEOUT), Ok(5));
        assert_eq!(HAL.sent(), b"hello");

        // the receive error is still pending for the reader
        let mut out = [0u8; 8];
        assert_eq!(UART.read(h, &mut out, NO_WAIT), Err(OsalError::Error));
        assert_eq!(UART.read(h, &mut out, NO_WAIT), Err(OsalError::Timeout));
    }

    #[test]
    fn test_tx_error_fails_only_the_send() {
        static HAL: FakeUart = FakeUart::new(1);
        static UART: UartRegistry<Host, FakeUart, 3, 32> = UartRegistry::new();

        let config = UartConfig {
            tx_mode: Dma,
            ..uart(Dma, 32, 0)
        };
        let h = UART.register(&HAL, config).unwrap();

        HAL.completion.set(move |_| UART.on_tx_error(h));
        assert_eq!(UART.send_timeout(h, b"lost", TIMEOUT), Err(OsalError::Error));
        let mut out = [0u8; 8];
        assert_eq!(UART.read(h, &mut out, NO_WAIT), Err(OsalError::Timeout));

        HAL.completion.set(move |_| UART.on_tx_complete(h));
        assert_eq!(UART.send_timeout(h, b"ok", TIMEOUT), Ok(2));
    }

    #[test]
    fn test_registration_rules() {
        static HALS: [FakeUart; 4] = [
            FakeUart::new(1),
            FakeUart::new(2),
            FakeUart::new(3),
            FakeUart::new(4),
        ];
        static UART: UartRegistry<Host, FakeUart, 3, 32> = UartRegistry::new();

        assert_eq!(
            UART.register(&HALS[0], uart(Dma, 0, 0)),
            Err(OsalError::InvalidParam)
        );
        assert_eq!(
            UART.register(&HALS[0], uart(Dma, 33, 0)),
            Err(OsalError::InvalidParam)
        );

        let first = UART.register(&HALS[0], uart(Dma, 32, 64)).unwrap();
        assert_eq!(UART.config(first).unwrap().expected_len, 32);
        assert_eq!(
            UART.register(&HALS[0], uart(Dma, 32, 0)),
            Err(OsalError::InvalidParam)
        );

        UART.register(&HALS[1], uart(Blocking, 32, 0)).unwrap();
        UART.register(&HALS[2], uart(Interrupt, 32, 0)).unwrap();
        assert_eq!(
            UART.register(&HALS[3], uart(Dma, 32, 0)),
            Err(OsalError::ResourceExhausted)
        );
        assert_eq!(UART.instance_count(), 3);

        UART.deregister(first).unwrap();
        assert_eq!(HALS[0].aborts.load(Ordering::SeqCst), 1);
        assert_eq!(UART.deregister(first), Err(OsalError::InvalidParam));
        let mut out = [0u8; 4];
        assert_eq!(UART.read(first, &mut out, 5), Err(OsalError::InvalidParam));
        UART.register(&HALS[3], uart(Dma, 32, 0)).unwrap();
    }

    #[test]
    fn test_consumer_thread_sees_each_frame() {
        static HAL: FakeUart = FakeUart::new(1);
        static UART: UartRegistry<Host, FakeUart, 3, 32> = UartRegistry::new();

        let h = UART.register(&HAL, uart(Dma, 32, 0)).unwrap();
        let lens = [10usize, 32, 5, 17];

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        let consumer = std::thread::spawn(move || {
            let mut seen = Vec::new();
            for _ in 0..lens.len() {
                let mut out = [0u8; 32];
                let n = UART.read(h, &mut out, TIMEOUT).unwrap();
                seen.push(out[..n].to_vec());
                ready_tx.send(()).unwrap();
            }
            seen
        });

        for (seed, &len) in lens.iter().enumerate() {
            HAL.deliver(&frame(seed as u8, len));
            Host::interrupt(|| UART.on_rx_event(h, 0));
            ready_rx.recv().unwrap();
        }

        let seen = consumer.join().unwrap();
        for (seed, (data, &len)) in seen.iter().zip(&lens).enumerate() {
            assert_eq!(data, &frame(seed as u8, len));
        }
    }
}

#[cfg(test)]
mod adc_tests {
    use super::*;

    fn adc(channels: usize, mode: TransferMode) -> AdcConfig {
        AdcConfig { channels, mode }
    }

    #[test]
    fn test_blocking_poll() {
        static HAL: FakeAdc = FakeAdc::new(1);
        static ADC: AdcRegistry<Host, FakeAdc> = AdcRegistry::new();

        HAL.set_samples(&[100, 200, 300]);
        let h = ADC.register(&HAL, adc(3, Blocking)).unwrap();
        ADC.start(h).unwrap();
        assert!(!HAL.is_armed());

        assert_eq!(ADC.get_values(h, TIMEOUT), Ok(3));
        let mut out = [0u16; 16];
        assert_eq!(ADC.values(h, &mut out), Ok(3));
        assert_eq!(&out[..3], &[100, 200, 300]);
        assert_eq!(ADC.channel_value(h, 1), Ok(200));
        assert_eq!(ADC.channel_value(h, 3), Err(OsalError::InvalidParam));
    }

    #[test]
    fn test_dma_frames() {
        static HAL: FakeAdc = FakeAdc::new(1);
        static ADC: AdcRegistry<Host, FakeAdc> = AdcRegistry::new();

        let h = ADC.register(&HAL, adc(4, Dma)).unwrap();
        ADC.start(h).unwrap();
        assert!(HAL.is_armed());

        for frame in [[1, 2, 3, 4], [4000, 3000, 2000, 1000]] {
            HAL.set_samples(&frame);
            HAL.convert_dma();
            Host::interrupt(|| ADC.on_conversion_complete(h));

            assert_eq!(ADC.get_values(h, TIMEOUT), Ok(4));
            let mut out = [0u16; 4];
            ADC.values(h, &mut out).unwrap();
            assert_eq!(out, frame);
        }
        assert_eq!(HAL.starts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_interrupt_frames() {
        static HAL: FakeAdc = FakeAdc::new(1);
        static ADC: AdcRegistry<Host, FakeAdc> = AdcRegistry::new();

        let h = ADC.register(&HAL, adc(2, Interrupt)).unwrap();
        ADC.start(h).unwrap();
        HAL.set_samples(&[1489, 1489]);
        Host::interrupt(|| ADC.on_conversion_complete(h));

        assert_eq!(ADC.get_values(h, TIMEOUT), Ok(2));
        let mut out = [0u16; 2];
        ADC.values(h, &mut out).unwrap();
        let reference = ReferenceVoltage::from_vrefint(&out).unwrap();
        assert!((reference.supply() - 3.3).abs() < 0.01);
    }

    #[test]
    fn test_stopped_device_ignores_completion() {
        static HAL: FakeAdc = FakeAdc::new(1);
        static ADC: AdcRegistry<Host, FakeAdc> = AdcRegistry::new();

        let h = ADC.register(&HAL, adc(2, Dma)).unwrap();
        Host::interrupt(|| ADC.on_conversion_complete(h));
        assert_eq!(ADC.get_values(h, 5), Err(OsalError::Timeout));

        ADC.start(h).unwrap();
        ADC.stop(h).unwrap();
        assert!(!HAL.is_armed());
        Host::interrupt(|| ADC.on_conversion_complete(h));
        assert_eq!(ADC.get_values(h, 5), Err(OsalError::Timeout));
    }

    #[test]
    fn test_error_restarts() {
        static HAL: FakeAdc = FakeAdc::new(1);
        static ADC: AdcRegistry<Host, FakeAdc> = AdcRegistry::new();

        let h = ADC.register(&HAL, adc(2, Dma)).unwrap();
        ADC.start(h).unwrap();
        Host::interrupt(|| ADC.on_error(h));

        assert_eq!(ADC.get_values(h, TIMEOUT), Err(OsalError::Error));
        assert_eq!(HAL.stops.load(Ordering::SeqCst), 1);
        assert_eq!(HAL.starts.load(Ordering::SeqCst), 2);
        assert!(HAL.is_armed());
    }

    #[test]
    fn test_registration_rules() {
        static HAL: FakeAdc = FakeAdc::new(1);
        static ADC: AdcRegistry<Host, FakeAdc> = AdcRegistry::new();

        assert_eq!(ADC.register(&HAL, adc(0, Dma)), Err(OsalError::InvalidParam));
        assert_eq!(ADC.register(&HAL, adc(17, Dma)), Err(OsalError::InvalidParam));

        let h = ADC.register(&HAL, adc(16, Dma)).unwrap();
        assert_eq!(ADC.register(&HAL, adc(1, Dma)), Err(OsalError::InvalidParam));

        ADC.start(h).unwrap();
        ADC.deregister(h).unwrap();
        assert_eq!(HAL.stops.load(Ordering::SeqCst), 1);
        assert_eq!(ADC.deregister(h), Err(OsalError::InvalidParam));
        assert_eq!(ADC.config(h), Err(OsalError::InvalidParam));
    }
}
