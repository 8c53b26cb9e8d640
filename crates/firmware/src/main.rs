//! Pulsebox is [Embassy](https://embassy.dev)-based firmware for a USB-MIDI processor running on the [Nucleo-F767ZI
//! development board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html), which is powered by an F7-series STM32
//! microcontroller.
//!
//! The device runs one application at a time (see [`AppKind`]): an echo effect, a drone sequencer or a clock generator.
//! All of the musical logic lives in `pulsebox_lib`; this binary owns the hardware and turns each stimulus (a timer
//! interrupt, a USB-MIDI packet, a button press) into a call on the shared [`Device`].

#![no_std]
#![no_main]

use defmt::{panic, *};
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_stm32::{
    Config, bind_interrupts,
    exti::ExtiInput,
    gpio::{Level, Output, Pull, Speed},
    peripherals,
    time::Hertz,
    usb,
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel, mutex};
use embassy_time::{Duration, Ticker, Timer};
use embassy_usb::{
    Builder, UsbDevice,
    class::midi::{self, MidiClass},
    driver::EndpointError,
};
use pulsebox_lib::{
    app::{AppKind, Device, MidiOut, Status},
    clock::TIMER_PERIOD_US,
    configuration::CycleConfig,
    usb_midi::{self, PACKET_SIZE},
};
use static_cell::StaticCell;
use wmidi::MidiMessage;

use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => usb::InterruptHandler<peripherals::USB_OTG_FS>;
    }
);

type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;
type DeviceAsyncMutex = mutex::Mutex<CriticalSectionRawMutex, Device<UsbMidiOut>>;

const OUTGOING_CAPACITY: usize = 64;
type PacketChannel = channel::Channel<CriticalSectionRawMutex, [u8; PACKET_SIZE], OUTGOING_CAPACITY>;

/// Packets waiting to be written to the host, in order.
static OUTGOING: PacketChannel = channel::Channel::new();

/// Realtime packets (clock and transport), written ahead of [`OUTGOING`].
static OUTGOING_REALTIME: PacketChannel = channel::Channel::new();

/// The [`MidiOut`] handed to the [`Device`]: frames messages as USB-MIDI Event Packets and leaves them for
/// [`midi_writer_task`].
struct UsbMidiOut;

impl UsbMidiOut {
    fn enqueue(queue: &'static PacketChannel, message: &MidiMessage<'_>) {
        match usb_midi::packet(message) {
            Some(packet) => {
                if queue.try_send(packet).is_err() {
                    warn!("Outgoing MIDI queue is full; dropping message");
                }
            }
            None => warn!("Message does not fit in a USB-MIDI Event Packet; dropping it"),
        }
    }
}

impl MidiOut for UsbMidiOut {
    fn send(&mut self, message: &MidiMessage<'_>) {
        Self::enqueue(&OUTGOING, message);
    }

    fn send_now(&mut self, message: &MidiMessage<'_>) {
        Self::enqueue(&OUTGOING_REALTIME, message);
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing Pulsebox");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // per section 5.2 of RM0410: the 48MHz clock used for USB OTG FS is derived from main PLL VCO (PLLQ clock)
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    let p = embassy_stm32::init(config);

    static DEVICE: StaticCell<DeviceAsyncMutex> = StaticCell::new();
    let device = DEVICE.init(mutex::Mutex::new(Device::new(
        AppKind::default().into(),
        UsbMidiOut,
    )));

    let button = ExtiInput::new(p.PC13, p.EXTI13, Pull::None);
    unwrap!(spawner.spawn(click_task(button, device)));

    let app_select = ExtiInput::new(p.PD1, p.EXTI1, Pull::Up);
    unwrap!(spawner.spawn(app_select_task(app_select, device)));

    let up = ExtiInput::new(p.PD0, p.EXTI0, Pull::Up);
    unwrap!(spawner.spawn(increment_task(up, device, 1)));
    let down = ExtiInput::new(p.PD2, p.EXTI2, Pull::Up);
    unwrap!(spawner.spawn(increment_task(down, device, -1)));

    let blue_led = Output::new(p.PB7, Level::Low, Speed::Low);
    unwrap!(spawner.spawn(app_display_task(blue_led, device)));

    let red_led = Output::new(p.PB14, Level::Low, Speed::Low);
    unwrap!(spawner.spawn(status_task(red_led, device)));

    // Create the driver, from the HAL.
    static ENDPOINT_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let mut config = embassy_stm32::usb::Config::default();

    // USB devices which are self-powered (i.e., that can stay powered on if unplugged from the host)
    // need to enable vbus_detection to comply with the USB spec. Per section 6.10 of the Nucleo board
    // manual (UM1974), CN13 (the USB port) cannot power the board; external power is necessary.
    config.vbus_detection = true;

    let driver = usb::Driver::new_fs(
        p.USB_OTG_FS,
        Irqs,
        p.PA12,
        p.PA11,
        ENDPOINT_OUT_BUFFER.init([0; 256]),
        config,
    );

    // per https://pid.codes, FOSS projects can apply to be listed under the vendor ID owned by InterBiometrics
    let vendor_id = 0x1209;
    let product_id = 0x5042;

    let mut config = embassy_usb::Config::new(vendor_id, product_id);
    config.manufacturer = Some("Pulsebox contributors");
    config.product = Some("Pulsebox");
    config.self_powered = true;
    config.max_power = 0;

    // Create embassy-usb DeviceBuilder using the driver and config.
    // It needs some buffers for building the descriptors.
    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // no msos descriptors
        CONTROL_BUFFER.init([0; 64]),
    );

    // one input jack and one output jack
    let class = MidiClass::new(&mut builder, 1, 1, 64);
    let usb = builder.build();
    let (sender, receiver) = class.split();

    unwrap!(spawner.spawn(usb_task(usb)));
    unwrap!(spawner.spawn(midi_reader_task(receiver, device)));
    unwrap!(spawner.spawn(midi_writer_task(sender)));
    unwrap!(spawner.spawn(clock_task(device)));
}

/// Drives the device's clock from a hardware timer.
#[embassy_executor::task]
async fn clock_task(device: &'static DeviceAsyncMutex) -> ! {
    let mut ticker = Ticker::every(Duration::from_micros(u64::from(TIMER_PERIOD_US)));
    loop {
        ticker.next().await;
        device.lock().await.on_timer();
    }
}

/// Forwards presses of the user button to the active application.
#[embassy_executor::task]
async fn click_task(mut button: ExtiInput<'static>, device: &'static DeviceAsyncMutex) -> ! {
    loop {
        button.wait_for_rising_edge().await;
        if !device.lock().await.click() {
            debug!("Click ignored by the active application");
        }
    }
}

/// Handles button presses, cycling through the available applications.
#[embassy_executor::task]
async fn app_select_task(mut button: ExtiInput<'static>, device: &'static DeviceAsyncMutex) -> ! {
    loop {
        button.wait_for_rising_edge().await;
        let mut device = device.lock().await;
        let next = device.app().kind().cycle();
        device.switch(next.into());
    }
}

/// Turns presses of a button into encoder increments of a fixed size.
#[embassy_executor::task(pool_size = 2)]
async fn increment_task(
    mut button: ExtiInput<'static>,
    device: &'static DeviceAsyncMutex,
    increment: i8,
) -> ! {
    loop {
        button.wait_for_falling_edge().await;
        if !device.lock().await.increment(increment) {
            debug!("Increment ignored by the active application");
        }
    }
}

/// Provides a quick and dirty indicator for the active application.
///
/// Each cycle is divided in half. The LED remains dark for one half. For the other, the
/// LED lights up N times (where N is one more than the index of the active application).
#[embassy_executor::task]
async fn app_display_task(mut led: Output<'static>, device: &'static DeviceAsyncMutex) -> ! {
    const BLINK_SLEEP_US: u64 = 1_000_000;

    loop {
        led.set_low();
        Timer::after_micros(BLINK_SLEEP_US).await;

        // since the index starts with 0, 1 is added or else the LED wouldn't blink at all for the zeroth application
        let blink_cnt = (device.lock().await.app().kind() as u8).saturating_add(1);
        // mult by two to account for the "off" periods, sub 1 so the LED always starts and ends lit
        let animation_frames = blink_cnt * 2 - 1;
        let mut counter = animation_frames;
        while counter > 0 {
            led.toggle();
            Timer::after_micros(BLINK_SLEEP_US / u64::from(animation_frames)).await;
            counter -= 1;
        }
    }
}

/// Lights the LED for a moment whenever the active application raises a [`Status`].
#[embassy_executor::task]
async fn status_task(mut led: Output<'static>, device: &'static DeviceAsyncMutex) -> ! {
    loop {
        Timer::after_millis(50).await;
        let status = device.lock().await.take_status();
        if let Some(Status::Overflow) = status {
            warn!("Event scheduler overflowed; notes were dropped");
            led.set_high();
            Timer::after_millis(500).await;
            led.set_low();
        }
    }
}

#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

#[embassy_executor::task]
async fn midi_reader_task(
    mut receiver: midi::Receiver<'static, UsbDriver>,
    device: &'static DeviceAsyncMutex,
) -> ! {
    loop {
        receiver.wait_connection().await;
        info!("USB connected");
        let _ = read_midi(&mut receiver, device).await;
        info!("USB disconnected");
    }
}

#[embassy_executor::task]
async fn midi_writer_task(mut sender: midi::Sender<'static, UsbDriver>) -> ! {
    loop {
        sender.wait_connection().await;
        let _ = write_midi(&mut sender).await;
    }
}

#[doc(hidden)]
struct Disconnected {}

impl From<EndpointError> for Disconnected {
    fn from(val: EndpointError) -> Self {
        match val {
            EndpointError::BufferOverflow => panic!("Buffer overflow"),
            EndpointError::Disabled => Disconnected {},
        }
    }
}

/// Helper function which interprets data received over USB and hands each message to the device.
async fn read_midi(
    receiver: &mut midi::Receiver<'static, UsbDriver>,
    device: &'static DeviceAsyncMutex,
) -> Result<(), Disconnected> {
    let mut buf = [0; 64];
    loop {
        let n = receiver.read_packet(&mut buf).await?;
        let mut device = device.lock().await;
        for message in usb_midi::messages(&buf[..n]) {
            device.receive(&message);
        }
    }
}

/// Helper function which writes queued packets to the host, realtime packets first.
async fn write_midi(sender: &mut midi::Sender<'static, UsbDriver>) -> Result<(), Disconnected> {
    loop {
        let packet = match select(OUTGOING_REALTIME.receive(), OUTGOING.receive()).await {
            Either::First(packet) | Either::Second(packet) => packet,
        };
        sender.write_packet(&packet).await?;
    }
}
