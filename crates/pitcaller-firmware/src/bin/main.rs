#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_net::{
    Config as NetConfig, DhcpConfig, Ipv4Address, Ipv4Cidr, Runner, StackResources,
    StaticConfigV4,
};
use embassy_time::{Delay, Duration, Instant, Ticker, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::Pin;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::wifi::WifiDevice;
use log::{error, info};
use static_cell::StaticCell;

use pitcaller_core::broadcaster::MAX_CLIENTS;
use pitcaller_core::network::{NetworkBootstrap, NetworkMode};
use pitcaller_core::switches::POLL_INTERVAL;
use pitcaller_firmware::app_state::{
    AppError, AppRunState, PitStop, error_message, init_lane_inputs,
};
use pitcaller_firmware::discovery::{dhcp_server_task, mdns_task};
use pitcaller_firmware::radio::EspRadio;
use pitcaller_firmware::server::{BUS_EVENTS, connection_task};
use pitcaller_firmware::wifi_secrets;

/// Address of the device while it hosts the fallback access point
const AP_ADDRESS: Ipv4Address = Ipv4Address::new(192, 168, 4, 1);

/// One socket per client slot, the DHCP client or server, mDNS and a spare
const SOCKET_COUNT: usize = MAX_CLIENTS + 3;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

fn enter(state: AppRunState) {
    info!("Run state: {:?}", state);
}

/// Log a fatal error and park the main task until the device is reset
async fn halt(e: AppError) -> ! {
    error!("{}", e);
    enter(AppRunState::Halted);
    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!(log::LevelFilter::Info);
    enter(AppRunState::Booting);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    let device_config = match wifi_secrets::device_config() {
        Ok(config) => config,
        Err(e) => halt(e.into()).await,
    };

    let lanes = init_lane_inputs(
        [
            peripherals.GPIO4.degrade(),
            peripherals.GPIO5.degrade(),
            peripherals.GPIO6.degrade(),
            peripherals.GPIO7.degrade(),
        ],
        device_config.active_level,
    );

    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    let radio_init =
        RADIO.init(esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller"));
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio_init, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");

    // Kept alive for the lifetime of the firmware; dropping it stops the radio
    let mut radio = EspRadio::new(wifi_controller);
    let mut bootstrap = NetworkBootstrap::new(
        &device_config.known_networks,
        &device_config.fallback_ap,
        device_config.join_policy,
    );

    enter(AppRunState::Bootstrapping);
    let mode = match bootstrap.run(&mut radio, &mut Delay).await {
        Ok(mode) => mode,
        Err(e) => halt(AppError::Bootstrap(error_message(format_args!("{}", e)))).await,
    };

    enter(AppRunState::AwaitingAddress);
    let (device, net_config) = match &mode {
        NetworkMode::Station { .. } => {
            let mut dhcp = DhcpConfig::default();
            dhcp.hostname = device_config.hostname.try_into().ok();
            (interfaces.sta, NetConfig::dhcpv4(dhcp))
        }
        NetworkMode::AccessPoint { .. } => {
            let static_config = StaticConfigV4 {
                address: Ipv4Cidr::new(AP_ADDRESS, 24),
                gateway: Some(AP_ADDRESS),
                dns_servers: Default::default(),
            };
            (interfaces.ap, NetConfig::ipv4_static(static_config))
        }
    };

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());

    static RESOURCES: StaticCell<StackResources<SOCKET_COUNT>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(
        device,
        net_config,
        RESOURCES.init(StackResources::new()),
        seed,
    );
    spawner.spawn(net_task(runner).expect("Failed to create network task"));

    if let NetworkMode::AccessPoint { .. } = mode {
        spawner.spawn(
            dhcp_server_task(stack, AP_ADDRESS).expect("Failed to create DHCP server task"),
        );
    }

    stack.wait_config_up().await;
    let address = match stack.config_v4() {
        Some(v4) => v4.address.address(),
        None => halt(AppError::Bootstrap(error_message(format_args!(
            "no IPv4 address on {}",
            mode.ssid()
        ))))
        .await,
    };
    info!(
        "Serving on http://{} (http://{}.local) via {}",
        address,
        device_config.hostname,
        mode.ssid()
    );
    spawner.spawn(
        mdns_task(stack, device_config.hostname, address).expect("Failed to create mDNS task"),
    );

    for slot in 0..MAX_CLIENTS as u8 {
        spawner.spawn(connection_task(stack, slot).expect("Failed to create connection task"));
    }

    let mut pit = PitStop::new(device_config.countdown_secs, lanes);
    enter(AppRunState::Running);

    let mut ticker = Ticker::every(POLL_INTERVAL);
    loop {
        if let Either::First(event) = select(BUS_EVENTS.receive(), ticker.next()).await {
            pit.handle_event(event, Instant::now());
        }
        pit.run_pass(Instant::now());
    }
}
